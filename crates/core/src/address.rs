use thiserror::Error;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUI_ADDRESS_HEX_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressDecodeError {
    #[error("address label is empty")]
    Empty,
    #[error("invalid base36 character {ch:?} in {label}")]
    InvalidCharacter { label: String, ch: char },
}

fn base36_digit(ch: u8) -> Option<u32> {
    BASE36_ALPHABET
        .iter()
        .position(|candidate| *candidate == ch)
        .map(|idx| idx as u32)
}

/// Decodes a base36 DNS label into bytes.
///
/// Follows base-x semantics: every leading `0` character stands for one
/// leading zero byte, so fixed-width addresses survive the round trip.
pub fn base36_decode(label: &str) -> Result<Vec<u8>, AddressDecodeError> {
    let normalized = label.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(AddressDecodeError::Empty);
    }
    let input = normalized.as_bytes();
    let leading_zeros = input.iter().take_while(|ch| **ch == BASE36_ALPHABET[0]).count();

    // little-endian accumulator, reversed at the end
    let mut acc: Vec<u8> = Vec::with_capacity(input.len());
    for ch in &input[leading_zeros..] {
        let Some(digit) = base36_digit(*ch) else {
            return Err(AddressDecodeError::InvalidCharacter {
                label: normalized.clone(),
                ch: char::from(*ch),
            });
        };
        let mut carry = digit;
        for byte in acc.iter_mut() {
            carry += u32::from(*byte) * 36;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            acc.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; leading_zeros];
    out.extend(acc.iter().rev());
    Ok(out)
}

pub fn base36_encode(bytes: &[u8]) -> String {
    let leading_zeros = bytes.iter().take_while(|byte| **byte == 0).count();

    // little-endian base36 digits
    let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 2);
    for byte in &bytes[leading_zeros..] {
        let mut carry = u32::from(*byte);
        for digit in digits.iter_mut() {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 36) as u8;
            carry /= 36;
        }
        while carry > 0 {
            digits.push((carry % 36) as u8);
            carry /= 36;
        }
    }

    let mut out = String::with_capacity(leading_zeros + digits.len());
    out.extend(std::iter::repeat(char::from(BASE36_ALPHABET[0])).take(leading_zeros));
    out.extend(
        digits
            .iter()
            .rev()
            .map(|digit| char::from(BASE36_ALPHABET[usize::from(*digit)])),
    );
    out
}

pub fn to_prefixed_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn base36_to_hex(label: &str) -> Result<String, AddressDecodeError> {
    base36_decode(label).map(|bytes| to_prefixed_hex(&bytes))
}

/// `0x` followed by exactly 64 hex digits; the checksum is not verified.
pub fn is_valid_sui_address(address: &str) -> bool {
    let Some(hex) = address.strip_prefix("0x") else {
        return false;
    };
    hex.len() == SUI_ADDRESS_HEX_LEN && hex.bytes().all(|ch| ch.is_ascii_hexdigit())
}
