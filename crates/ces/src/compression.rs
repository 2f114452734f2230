//! Step 1 of the CES pipeline: compress with the configured algorithm,
//! choosing a level automatically when `CompressionLevel::Adaptive` is set.

use neuro_protocol::{CompressionAlgo, CompressionLevel};

use crate::error::CesError;

/// Rough byte-entropy sniff over a capped prefix, used to pick a zstd level
/// for `Adaptive`: high-entropy input (already compressed, encrypted, random)
/// gets a cheap level since spending CPU squeezing it further rarely pays
/// off, while low-entropy input gets a high level.
fn estimate_entropy_bits_per_byte(data: &[u8]) -> f64 {
    const SNIFF_LEN: usize = 64 * 1024;
    let sample = &data[..data.len().min(SNIFF_LEN)];
    if sample.is_empty() {
        return 8.0;
    }
    let mut counts = [0u64; 256];
    for &b in sample {
        counts[b as usize] += 1;
    }
    let len = sample.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn adaptive_zstd_level(data: &[u8]) -> i32 {
    let bits = estimate_entropy_bits_per_byte(data);
    if bits > 7.5 {
        1
    } else if bits > 6.5 {
        6
    } else {
        19
    }
}

fn adaptive_brotli_quality(data: &[u8]) -> u32 {
    let bits = estimate_entropy_bits_per_byte(data);
    if bits > 7.5 {
        2
    } else if bits > 6.5 {
        7
    } else {
        11
    }
}

pub fn compress(data: &[u8], algo: CompressionAlgo, level: CompressionLevel) -> Result<Vec<u8>, CesError> {
    match algo {
        CompressionAlgo::None => Ok(data.to_vec()),
        CompressionAlgo::Zstd => {
            let lvl = match level {
                CompressionLevel::Fixed(l) => l as i32,
                CompressionLevel::Adaptive => adaptive_zstd_level(data),
            };
            zstd::encode_all(data, lvl).map_err(|e| CesError::CompressionError(e.to_string()))
        }
        CompressionAlgo::Brotli => {
            let quality = match level {
                CompressionLevel::Fixed(l) => (l as u32).min(11),
                CompressionLevel::Adaptive => adaptive_brotli_quality(data),
            };
            let mut out = Vec::new();
            let params = brotli::enc::BrotliEncoderParams {
                quality: quality as i32,
                ..Default::default()
            };
            brotli::BrotliCompress(&mut &data[..], &mut out, &params)
                .map_err(|e| CesError::CompressionError(e.to_string()))?;
            Ok(out)
        }
    }
}

pub fn decompress(data: &[u8], algo: CompressionAlgo) -> Result<Vec<u8>, CesError> {
    match algo {
        CompressionAlgo::None => Ok(data.to_vec()),
        CompressionAlgo::Zstd => {
            zstd::decode_all(data).map_err(|e| CesError::DecompressionError(e.to_string()))
        }
        CompressionAlgo::Brotli => {
            let mut out = Vec::new();
            brotli::BrotliDecompress(&mut &data[..], &mut out)
                .map_err(|e| CesError::DecompressionError(e.to_string()))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_round_trips() {
        let data = b"hello hello hello hello hello world world world".repeat(20);
        let c = compress(&data, CompressionAlgo::Zstd, CompressionLevel::Fixed(5)).unwrap();
        let d = decompress(&c, CompressionAlgo::Zstd).unwrap();
        assert_eq!(d, data);
    }

    #[test]
    fn brotli_round_trips() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let c = compress(&data, CompressionAlgo::Brotli, CompressionLevel::Adaptive).unwrap();
        let d = decompress(&c, CompressionAlgo::Brotli).unwrap();
        assert_eq!(d, data);
    }

    #[test]
    fn none_is_identity() {
        let data = vec![1, 2, 3, 4, 5];
        let c = compress(&data, CompressionAlgo::None, CompressionLevel::Adaptive).unwrap();
        assert_eq!(c, data);
        let d = decompress(&c, CompressionAlgo::None).unwrap();
        assert_eq!(d, data);
    }

    #[test]
    fn empty_input_round_trips() {
        let c = compress(&[], CompressionAlgo::Zstd, CompressionLevel::Adaptive).unwrap();
        let d = decompress(&c, CompressionAlgo::Zstd).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn adaptive_picks_high_level_for_repetitive_data() {
        let data = vec![b'x'; 10_000];
        let bits = estimate_entropy_bits_per_byte(&data);
        assert!(bits < 1.0);
        assert_eq!(adaptive_zstd_level(&data), 19);
    }
}
