//! Compiler configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::file::{FuncSpec, TempAllocator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Directory that bridge, split, sample and index files are allocated under.
    pub temp_dir: String,

    /// Serializer used for every compiler-allocated temp file.
    pub temp_serializer: String,

    /// Seed for temp-file naming. Same plan + same seed => same job graph.
    pub seed: u64,

    /// Cluster default reducer count. `None` means "unknown"; sorts without an
    /// explicit parallelism then fall back to 1 with a warning.
    pub default_parallelism: Option<usize>,

    /// Pins skewed-join fanout, winning over the partition counter.
    pub skew_reducers: Option<usize>,

    /// Poisson sampler rate (rows per sample) for skewed joins.
    pub skew_sample_rate: u64,

    /// Fraction of reducer memory a hot key may use before it is fanned out.
    pub skew_memory_fraction: f64,

    /// Rows the random-sample loader keeps per split for sort quantiles.
    pub sort_sample_size: u64,

    /// Run the rearrange adjuster post-pass.
    pub adjust_rearranges: bool,

    /// Run the limit adjuster post-pass.
    pub adjust_limits: bool,

    /// Loaders that can seek by key in sorted input (merge joins skip the
    /// index job for these).
    pub indexed_loaders: Vec<String>,

    /// Loaders that keep every key inside one split (map-side grouping).
    pub collected_group_loaders: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            temp_dir: "/tmp/mrplan".to_string(),
            temp_serializer: "InterStorage".to_string(),
            seed: 0,
            default_parallelism: None,
            skew_reducers: None,
            skew_sample_rate: 17,
            skew_memory_fraction: 0.3,
            sort_sample_size: 100,
            adjust_rearranges: true,
            adjust_limits: true,
            indexed_loaders: vec![],
            collected_group_loaders: vec![],
        }
    }
}

impl CompilerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MRPLAN_TEMP_DIR`: temp file directory
    /// - `MRPLAN_TEMP_SERIALIZER`: serializer name for temp files
    /// - `MRPLAN_SEED`: temp naming seed
    /// - `MRPLAN_DEFAULT_PARALLELISM`: cluster default reducer count
    /// - `MRPLAN_SKEW_REDUCERS`: pinned skewed-join fanout
    /// - `MRPLAN_SKEW_SAMPLE_RATE`, `MRPLAN_SKEW_MEMORY_FRACTION`
    /// - `MRPLAN_SORT_SAMPLE_SIZE`
    /// - `MRPLAN_ADJUST_REARRANGES`, `MRPLAN_ADJUST_LIMITS`: `true`/`false`
    /// - `MRPLAN_INDEXED_LOADERS`, `MRPLAN_COLLECTED_GROUP_LOADERS`: comma-separated names
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("MRPLAN_TEMP_DIR") {
            cfg.temp_dir = s;
        }

        if let Ok(s) = std::env::var("MRPLAN_TEMP_SERIALIZER") {
            cfg.temp_serializer = s;
        }

        if let Ok(s) = std::env::var("MRPLAN_SEED") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.seed = v;
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_DEFAULT_PARALLELISM") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.default_parallelism = Some(v);
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_SKEW_REDUCERS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.skew_reducers = Some(v);
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_SKEW_SAMPLE_RATE") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.skew_sample_rate = v;
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_SKEW_MEMORY_FRACTION") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.skew_memory_fraction = v;
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_SORT_SAMPLE_SIZE") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.sort_sample_size = v;
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_ADJUST_REARRANGES") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.adjust_rearranges = v;
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_ADJUST_LIMITS") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.adjust_limits = v;
            }
        }

        if let Ok(s) = std::env::var("MRPLAN_INDEXED_LOADERS") {
            cfg.indexed_loaders = split_list(&s);
        }

        if let Ok(s) = std::env::var("MRPLAN_COLLECTED_GROUP_LOADERS") {
            cfg.collected_group_loaders = split_list(&s);
        }

        cfg
    }

    /// Reject values no compilation could use.
    pub fn validate(&self) -> Result<()> {
        if self.temp_dir.trim().is_empty() {
            return Err(Error::Config("temp_dir must not be empty".into()));
        }
        if self.temp_serializer.trim().is_empty() {
            return Err(Error::Config("temp_serializer must not be empty".into()));
        }
        if self.default_parallelism == Some(0) || self.skew_reducers == Some(0) {
            return Err(Error::Config("reducer counts must be at least 1".into()));
        }
        if self.skew_sample_rate == 0 || self.sort_sample_size == 0 {
            return Err(Error::Config("sample sizes must be at least 1".into()));
        }
        if !(self.skew_memory_fraction > 0.0 && self.skew_memory_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "skew_memory_fraction must be in (0, 1], got {}",
                self.skew_memory_fraction
            )));
        }
        Ok(())
    }

    /// Cluster default reducer count, or `Environment` when it is unknown.
    pub fn cluster_reducers(&self) -> Result<usize> {
        self.default_parallelism
            .ok_or_else(|| Error::Environment("cluster default reducer count is not configured".into()))
    }

    /// Temp allocator for one compilation.
    pub fn temp_allocator(&self) -> TempAllocator {
        TempAllocator::new(
            self.temp_dir.clone(),
            FuncSpec::new(self.temp_serializer.clone()),
            self.seed,
        )
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
