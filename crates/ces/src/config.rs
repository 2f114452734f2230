use neuro_protocol::{CompressionAlgo, CompressionLevel};

use crate::error::CesError;

/// Per-invocation CES pipeline configuration (spec §4.1's `cfg` argument).
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub compression_algo: CompressionAlgo,
    pub compression_level: CompressionLevel,
    pub k: u8,
    pub m: u8,
    pub max_shard_size_hint: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compression_algo: CompressionAlgo::Zstd,
            compression_level: CompressionLevel::Fixed(3),
            k: 4,
            m: 2,
            max_shard_size_hint: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), CesError> {
        if self.k == 0 {
            return Err(CesError::InvalidConfig("k must be >= 1".into()));
        }
        if (self.k as u16 + self.m as u16) > 255 {
            return Err(CesError::InvalidConfig("k + m must be <= 255".into()));
        }
        if let CompressionLevel::Fixed(level) = self.compression_level {
            if !(1..=22).contains(&level) {
                return Err(CesError::InvalidConfig(
                    "compression level must be 1..=22 or adaptive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Façade-facing config (spec §6 `CesConfig`): the exact recognized option
/// set, translated into a `PipelineConfig` plus placement/cache parameters
/// that live outside the codec itself.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CesConfig {
    pub compression_algo: CompressionAlgo,
    pub compression_level: CompressionLevel,
    pub shards_data: u8,
    pub shards_parity: u8,
    pub redundancy_floor: u16,
    pub ttl_seconds: u64,
    pub placement_diversity_bias: f64,
    pub max_shard_size_hint: Option<u64>,
}

impl Default for CesConfig {
    fn default() -> Self {
        Self {
            compression_algo: CompressionAlgo::Zstd,
            compression_level: CompressionLevel::Adaptive,
            shards_data: 4,
            shards_parity: 2,
            redundancy_floor: 5,
            ttl_seconds: 0,
            placement_diversity_bias: 0.5,
            max_shard_size_hint: None,
        }
    }
}

impl CesConfig {
    pub fn validate(&self) -> Result<(), CesError> {
        if self.shards_data == 0 {
            return Err(CesError::InvalidConfig("shardsData must be >= 1".into()));
        }
        if (self.shards_data as u16 + self.shards_parity as u16) > 255 {
            return Err(CesError::InvalidConfig("shardsData + shardsParity must be <= 255".into()));
        }
        let total = self.shards_data as u16 + self.shards_parity as u16;
        if !(self.shards_data as u16..=total).contains(&self.redundancy_floor) {
            return Err(CesError::InvalidConfig(
                "redundancyFloor must be in [k, k+m]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.placement_diversity_bias) {
            return Err(CesError::InvalidConfig(
                "placementDiversityBias must be in [0,1]".into(),
            ));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            compression_algo: self.compression_algo,
            compression_level: self.compression_level,
            k: self.shards_data,
            m: self.shards_parity,
            max_shard_size_hint: self.max_shard_size_hint,
        }
    }
}
