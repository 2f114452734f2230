//! Planning-phase input splitting (spec §4.5). Each strategy returns
//! `(start, end)` byte ranges into the job's `input` buffer rather than
//! copies, so the scheduler can slice lazily at dispatch time.

use std::collections::HashMap;

use neuro_protocol::SplitStrategy;

use crate::error::SchedulerError;

pub type ChunkRange = (u64, u64);

pub fn split(input: &[u8], strategy: SplitStrategy, num_workers: usize) -> Result<Vec<ChunkRange>, SchedulerError> {
    match strategy {
        SplitStrategy::None => Ok(vec![(0, input.len() as u64)]),

        SplitStrategy::FixedChunks(n) => {
            let n = n as usize;
            if n == 0 {
                return Err(SchedulerError::InvalidJob("fixedChunks(0) is not a valid split".into()));
            }
            let len = input.len();
            let chunk_len = len.div_ceil(n);
            let mut ranges = Vec::with_capacity(n);
            let mut start = 0usize;
            while start < len {
                let end = (start + chunk_len).min(len);
                ranges.push((start as u64, end as u64));
                start = end;
            }
            if ranges.is_empty() {
                ranges.push((0, 0));
            }
            Ok(ranges)
        }

        SplitStrategy::ByRecord { delim, drop_empty } => {
            let mut ranges = Vec::new();
            let mut start = 0usize;
            for (i, &b) in input.iter().enumerate() {
                if b == delim {
                    if !(drop_empty && i == start) {
                        ranges.push((start as u64, i as u64));
                    }
                    start = i + 1;
                }
            }
            if start < input.len() || !(drop_empty && start == input.len()) {
                if !(drop_empty && start == input.len()) {
                    ranges.push((start as u64, input.len() as u64));
                }
            }
            Ok(ranges)
        }

        SplitStrategy::ByKey { max_chunks } => {
            // Records are newline-delimited `key\tvalue` pairs; co-keyed
            // records land in the same hash-partitioned bucket.
            let n = (num_workers.max(1)).min(max_chunks.max(1) as usize);
            let mut buckets: HashMap<usize, Vec<ChunkRange>> = HashMap::new();
            let mut start = 0usize;
            for (i, &b) in input.iter().enumerate() {
                if b == b'\n' {
                    let record = &input[start..i];
                    let key_end = record.iter().position(|&c| c == b'\t').unwrap_or(record.len());
                    let key = &record[..key_end];
                    let bucket = (fnv1a(key) as usize) % n;
                    buckets.entry(bucket).or_default().push((start as u64, i as u64));
                    start = i + 1;
                }
            }
            if start < input.len() {
                let record = &input[start..];
                let key_end = record.iter().position(|&c| c == b'\t').unwrap_or(record.len());
                let key = &record[..key_end];
                let bucket = (fnv1a(key) as usize) % n;
                buckets.entry(bucket).or_default().push((start as u64, input.len() as u64));
            }
            // one merged range list per non-empty bucket, in bucket order,
            // collapsed to the bucket's span for simplicity of downstream dispatch
            let mut out: Vec<ChunkRange> = Vec::new();
            let mut keys: Vec<usize> = buckets.keys().copied().collect();
            keys.sort_unstable();
            for k in keys {
                let ranges = &buckets[&k];
                let min = ranges.iter().map(|(s, _)| *s).min().unwrap();
                let max = ranges.iter().map(|(_, e)| *e).max().unwrap();
                out.push((min, max));
            }
            Ok(out)
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_a_single_chunk() {
        let ranges = split(b"hello world", SplitStrategy::None, 4).unwrap();
        assert_eq!(ranges, vec![(0, 11)]);
    }

    #[test]
    fn fixed_chunks_splits_roughly_evenly_with_short_last_chunk() {
        let ranges = split(&vec![0u8; 10], SplitStrategy::FixedChunks(3), 1).unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges.last().unwrap().1, 10);
    }

    #[test]
    fn by_record_splits_on_delimiter_without_straddling() {
        let ranges = split(b"aaa,bb,c", SplitStrategy::ByRecord { delim: b',', drop_empty: false }, 1).unwrap();
        assert_eq!(ranges, vec![(0, 3), (4, 6), (7, 8)]);
    }

    #[test]
    fn by_record_drops_empty_when_configured() {
        let ranges = split(b"a,,b", SplitStrategy::ByRecord { delim: b',', drop_empty: true }, 1).unwrap();
        assert_eq!(ranges, vec![(0, 1), (3, 4)]);
    }

    #[test]
    fn fixed_chunks_zero_is_rejected() {
        let err = split(b"data", SplitStrategy::FixedChunks(0), 1).unwrap_err();
        assert_eq!(err, SchedulerError::InvalidJob("fixedChunks(0) is not a valid split".into()));
    }

    #[test]
    fn by_key_coalesces_same_key_into_one_bucket() {
        let input = b"a\t1\nb\t2\na\t3\n";
        let ranges = split(input, SplitStrategy::ByKey { max_chunks: 8 }, 4).unwrap();
        assert!(ranges.len() <= 4);
    }
}
