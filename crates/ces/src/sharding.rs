//! Step 4 of the CES pipeline: Reed-Solomon erasure coding over GF(2^8),
//! generalised from the teacher's fixed data/parity pair to the full
//! `k in 1..=255, m in 0..=255, k+m<=255` range the spec requires.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::CesError;

/// Zero-pads `data` up to a multiple of `k`, returning the padded buffer and
/// the original length (needed to trim padding back off on reconstruction).
fn pad_to_multiple(data: &[u8], k: usize) -> (Vec<u8>, usize) {
    let original_len = data.len();
    let shard_len = (original_len.max(1)).div_ceil(k);
    let padded_len = shard_len * k;
    let mut padded = data.to_vec();
    padded.resize(padded_len, 0);
    (padded, original_len)
}

pub struct Shards {
    pub shard_size: usize,
    pub original_len: usize,
    pub shards: Vec<Vec<u8>>,
}

pub fn encode(data: &[u8], k: u8, m: u8) -> Result<Shards, CesError> {
    let k = k as usize;
    let m = m as usize;
    if k == 0 {
        return Err(CesError::ShardingError("k must be >= 1".into()));
    }
    if k + m > 255 {
        return Err(CesError::ShardingError("k + m must be <= 255".into()));
    }

    let (padded, original_len) = pad_to_multiple(data, k);
    let shard_size = padded.len() / k;

    let mut shards: Vec<Vec<u8>> = padded
        .chunks(shard_size)
        .map(|c| c.to_vec())
        .collect();
    shards.resize(k + m, vec![0u8; shard_size]);

    if m > 0 {
        let rs = ReedSolomon::new(k, m)
            .map_err(|e| CesError::ShardingError(format!("rs init: {e:?}")))?;
        rs.encode(&mut shards)
            .map_err(|e| CesError::ShardingError(format!("rs encode: {e:?}")))?;
    }

    Ok(Shards { shard_size, original_len, shards })
}

/// Reconstructs the original plaintext from a presence mask over `k+m`
/// shards. At least `k` of them must be `Some`.
pub fn decode(
    mut shards: Vec<Option<Vec<u8>>>,
    k: u8,
    m: u8,
    original_len: usize,
) -> Result<Vec<u8>, CesError> {
    let k = k as usize;
    let m = m as usize;
    let have = shards.iter().filter(|s| s.is_some()).count();
    if have < k {
        return Err(CesError::InsufficientShards { needed: k, have });
    }

    if m > 0 {
        let rs = ReedSolomon::new(k, m)
            .map_err(|e| CesError::ShardingError(format!("rs init: {e:?}")))?;
        rs.reconstruct(&mut shards)
            .map_err(|e| CesError::ShardingError(format!("rs reconstruct: {e:?}")))?;
    }

    let mut out = Vec::with_capacity(original_len);
    for shard in shards.into_iter().take(k) {
        let shard = shard.ok_or(CesError::IntegrityCheckFailed)?;
        out.extend_from_slice(&shard);
    }
    out.truncate(original_len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_all_shards() {
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly".repeat(3);
        let encoded = encode(&data, 4, 2).unwrap();
        let presence: Vec<Option<Vec<u8>>> = encoded.shards.into_iter().map(Some).collect();
        let back = decode(presence, 4, 2, encoded.original_len).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn survives_losing_up_to_m_shards() {
        let data = b"redundancy should save us from exactly m losses".to_vec();
        let encoded = encode(&data, 4, 2).unwrap();
        let mut presence: Vec<Option<Vec<u8>>> = encoded.shards.into_iter().map(Some).collect();
        presence[0] = None;
        presence[5] = None;
        let back = decode(presence, 4, 2, encoded.original_len).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn fails_with_fewer_than_k_shards() {
        let data = b"not enough shards here".to_vec();
        let encoded = encode(&data, 4, 2).unwrap();
        let mut presence: Vec<Option<Vec<u8>>> = encoded.shards.into_iter().map(Some).collect();
        presence[0] = None;
        presence[1] = None;
        presence[2] = None;
        let err = decode(presence, 4, 2, encoded.original_len).unwrap_err();
        assert_eq!(err, CesError::InsufficientShards { needed: 4, have: 3 });
    }

    #[test]
    fn k1_m0_boundary_is_identity_sharding() {
        let data = b"single shard, no parity".to_vec();
        let encoded = encode(&data, 1, 0).unwrap();
        assert_eq!(encoded.shards.len(), 1);
        let presence: Vec<Option<Vec<u8>>> = encoded.shards.into_iter().map(Some).collect();
        let back = decode(presence, 1, 0, encoded.original_len).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn k_plus_m_over_255_is_rejected() {
        let err = encode(b"x", 200, 56).unwrap_err();
        assert_eq!(err, CesError::ShardingError("k + m must be <= 255".into()));
    }

    #[test]
    fn empty_input_round_trips() {
        let encoded = encode(&[], 4, 2).unwrap();
        let presence: Vec<Option<Vec<u8>>> = encoded.shards.into_iter().map(Some).collect();
        let back = decode(presence, 4, 2, encoded.original_len).unwrap();
        assert!(back.is_empty());
    }
}
