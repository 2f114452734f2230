//! Property-based coverage of the CES pipeline's quantified invariants:
//! round-trip fidelity and parity-loss tolerance across varied input shapes
//! and k/m choices.

use neuro_ces::{encryption, process, reconstruct, PipelineConfig};
use neuro_protocol::{CompressionAlgo, CompressionLevel};
use proptest::prelude::*;

fn arb_cfg() -> impl Strategy<Value = (u8, u8)> {
    (1u8..=8, 0u8..=4)
}

proptest! {
    #[test]
    fn round_trip_holds_for_arbitrary_bytes_and_shapes(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        (k, m) in arb_cfg(),
    ) {
        let cfg = PipelineConfig {
            compression_algo: CompressionAlgo::Zstd,
            compression_level: CompressionLevel::Adaptive,
            k,
            m,
            max_shard_size_hint: None,
        };
        let cipher_key = [9u8; encryption::KEY_SIZE];
        let mac_key = b"proptest-key";

        let (manifest, shards) = process(&data, "f", &cfg, &cipher_key, mac_key, 1, 0).unwrap();
        let presence: Vec<Option<Vec<u8>>> = shards.into_iter().map(|s| Some(s.payload)).collect();
        let back = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap();
        prop_assert_eq!(back, data);
    }

    #[test]
    fn survives_any_loss_of_up_to_m_shards(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        (k, m) in arb_cfg(),
        seed in any::<u64>(),
    ) {
        let cfg = PipelineConfig {
            compression_algo: CompressionAlgo::None,
            compression_level: CompressionLevel::Fixed(1),
            k,
            m,
            max_shard_size_hint: None,
        };
        let cipher_key = [11u8; encryption::KEY_SIZE];
        let mac_key = b"proptest-key-2";

        let (manifest, shards) = process(&data, "f", &cfg, &cipher_key, mac_key, 1, 0).unwrap();
        let total = shards.len();
        let mut presence: Vec<Option<Vec<u8>>> = shards.into_iter().map(|s| Some(s.payload)).collect();

        // deterministically drop up to m indices using the seed
        let mut to_drop: Vec<usize> = (0..total).collect();
        let mut rng_state = seed;
        for i in (1..to_drop.len()).rev() {
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let j = (rng_state >> 33) as usize % (i + 1);
            to_drop.swap(i, j);
        }
        for &idx in to_drop.iter().take(m as usize) {
            presence[idx] = None;
        }

        let back = reconstruct(presence, &manifest, &cipher_key, mac_key).unwrap();
        prop_assert_eq!(back, data);
    }
}
