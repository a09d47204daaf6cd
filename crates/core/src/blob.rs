use base64::alphabet::URL_SAFE;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;
use thiserror::Error;

// 中文注释：blob id 是 base64url；部分客户端会补 `=`，部分不会，两种都要接受。
// 末尾多余的非零 bit 直接丢弃，不当作错误。
const BLOB_ID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlobIdError {
    #[error("blob id is empty")]
    Empty,
    #[error("invalid blob id {blob_id}: {reason}")]
    InvalidEncoding { blob_id: String, reason: String },
}

/// Unsigned big-endian integer reinterpretation of a blob id.
///
/// Only used to pick a backend, so the value is kept as raw bytes and reduced
/// modulo the candidate count on demand instead of materialising a bignum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSeed {
    be_bytes: Vec<u8>,
}

impl BlobSeed {
    pub fn from_blob_id(blob_id: &str) -> Result<Self, BlobIdError> {
        let trimmed = blob_id.trim();
        if trimmed.is_empty() {
            return Err(BlobIdError::Empty);
        }
        let be_bytes = BLOB_ID_ENGINE
            .decode(trimmed)
            .map_err(|err| BlobIdError::InvalidEncoding {
                blob_id: trimmed.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { be_bytes })
    }

    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        Self {
            be_bytes: bytes.to_vec(),
        }
    }

    pub fn as_be_bytes(&self) -> &[u8] {
        &self.be_bytes
    }

    /// `self mod modulus`. Returns `None` for a zero modulus.
    pub fn rem_u64(&self, modulus: u64) -> Option<u64> {
        if modulus == 0 {
            return None;
        }
        let modulus = u128::from(modulus);
        let rem = self
            .be_bytes
            .iter()
            .fold(0u128, |acc, byte| ((acc << 8) | u128::from(*byte)) % modulus);
        Some(rem as u64)
    }
}

impl From<u64> for BlobSeed {
    fn from(value: u64) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }
}
