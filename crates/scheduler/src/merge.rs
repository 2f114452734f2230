//! Merge-phase combination of chunk results (spec §4.5). `mapReduce` defers
//! the actual reduction to the sandboxed executor — this module only
//! prepares the reducer's input list — since only the executor may run
//! untrusted WASM.

use neuro_protocol::MergeStrategy;

use crate::error::SchedulerError;

pub enum MergeOutcome {
    Bytes(Vec<u8>),
    /// The caller must invoke the reducer WASM module over these inputs.
    ReducerInputs(Vec<Vec<u8>>),
}

pub fn merge(strategy: MergeStrategy, chunk_results: Vec<Vec<u8>>) -> Result<MergeOutcome, SchedulerError> {
    match strategy {
        MergeStrategy::Concat => {
            let mut out = Vec::new();
            for chunk in chunk_results {
                out.extend_from_slice(&chunk);
            }
            Ok(MergeOutcome::Bytes(out))
        }
        MergeStrategy::Sum => Ok(MergeOutcome::Bytes(sum_elementwise(&chunk_results)?)),
        MergeStrategy::MapReduce => Ok(MergeOutcome::ReducerInputs(chunk_results)),
    }
}

fn sum_elementwise(chunk_results: &[Vec<u8>]) -> Result<Vec<u8>, SchedulerError> {
    let Some(first) = chunk_results.first() else {
        return Ok(Vec::new());
    };
    if first.len() % 8 != 0 || !chunk_results.iter().all(|c| c.len() == first.len()) {
        return Err(SchedulerError::MergeShapeMismatch);
    }
    let n = first.len() / 8;
    let mut acc = vec![0i64; n];
    for chunk in chunk_results {
        for (i, word) in chunk.chunks_exact(8).enumerate() {
            acc[i] += i64::from_le_bytes(word.try_into().unwrap());
        }
    }
    let mut out = Vec::with_capacity(first.len());
    for v in acc {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_preserves_chunk_index_order() {
        let chunks = vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()];
        match merge(MergeStrategy::Concat, chunks).unwrap() {
            MergeOutcome::Bytes(b) => assert_eq!(b, b"abcdef"),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn sum_adds_elementwise_i64_vectors() {
        let a = 3i64.to_le_bytes().to_vec();
        let b = 4i64.to_le_bytes().to_vec();
        let c = 5i64.to_le_bytes().to_vec();
        match merge(MergeStrategy::Sum, vec![a, b, c]).unwrap() {
            MergeOutcome::Bytes(out) => assert_eq!(i64::from_le_bytes(out.try_into().unwrap()), 12),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn sum_rejects_heterogeneous_shapes() {
        let a = 3i64.to_le_bytes().to_vec();
        let b = vec![0u8; 16];
        let err = merge(MergeStrategy::Sum, vec![a, b]).unwrap_err();
        assert_eq!(err, SchedulerError::MergeShapeMismatch);
    }
}
