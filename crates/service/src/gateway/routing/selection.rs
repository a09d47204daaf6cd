use rand::Rng;
use retriever_core::blob::BlobSeed;

use super::RetrievalError;

/// Index of the backend that owns `seed`, or a uniformly random index when no
/// seed is available.
pub fn select_backend_index(
    seed: Option<&BlobSeed>,
    len: usize,
) -> Result<usize, RetrievalError> {
    if len == 0 {
        return Err(RetrievalError::NoCandidates);
    }
    match seed {
        Some(seed) => seed
            .rem_u64(len as u64)
            .map(|idx| idx as usize)
            .ok_or(RetrievalError::NoCandidates),
        None => Ok(rand::thread_rng().gen_range(0..len)),
    }
}

pub fn select_aggregator<'a>(
    seed: Option<&BlobSeed>,
    aggregators: &'a [String],
) -> Result<&'a str, RetrievalError> {
    let idx = select_backend_index(seed, aggregators.len())?;
    Ok(aggregators[idx].as_str())
}

/// Up to `width` candidates in ring order, starting at `start`.
pub fn race_set(candidates: &[String], start: usize, width: usize) -> Vec<String> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let width = width.clamp(1, candidates.len());
    candidates
        .iter()
        .cycle()
        .skip(start % candidates.len())
        .take(width)
        .cloned()
        .collect()
}
