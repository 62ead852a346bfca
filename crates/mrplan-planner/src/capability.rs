//! Questions the compiler asks its environment.
//!
//! Both collaborators are consulted only to skip otherwise mandatory
//! auxiliary jobs or to size one; neither does any I/O here.

use std::collections::BTreeSet;

use mrplan_core::config::CompilerConfig;
use mrplan_core::file::FuncSpec;

/// What a loader can do natively.
pub trait LoaderCapabilities {
    /// Loader can seek to a key in sorted input, so a merge join needs no
    /// offline index job.
    fn supports_indexing(&self, loader: &FuncSpec) -> bool;

    /// Loader guarantees every key lives in one split, so grouping can
    /// happen map-side.
    fn supports_collected_group(&self, loader: &FuncSpec) -> bool;
}

/// Sizes the reduce side of a skewed join.
///
/// `default` is the cluster reducer count when one is configured. `None`
/// means the counter has no answer and the compiler falls back to one
/// reducer with a warning.
pub trait PartitionCounter {
    fn fanout(&self, requested: Option<usize>, default: Option<usize>) -> Option<usize>;
}

/// Capability sets keyed by loader name.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    pub indexing: BTreeSet<String>,
    pub collected_group: BTreeSet<String>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indexing(mut self, loader: impl Into<String>) -> Self {
        self.indexing.insert(loader.into());
        self
    }

    pub fn with_collected_group(mut self, loader: impl Into<String>) -> Self {
        self.collected_group.insert(loader.into());
        self
    }
}

impl LoaderCapabilities for StaticCapabilities {
    fn supports_indexing(&self, loader: &FuncSpec) -> bool {
        self.indexing.contains(&loader.name)
    }

    fn supports_collected_group(&self, loader: &FuncSpec) -> bool {
        self.collected_group.contains(&loader.name)
    }
}

/// Uses the requested count when there is one, else the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestedOrDefault;

impl PartitionCounter for RequestedOrDefault {
    fn fanout(&self, requested: Option<usize>, default: Option<usize>) -> Option<usize> {
        requested.or(default).map(|n| n.max(1))
    }
}

/// Always answers `k`.
#[derive(Debug, Clone, Copy)]
pub struct FixedFanout(pub usize);

impl PartitionCounter for FixedFanout {
    fn fanout(&self, _requested: Option<usize>, _default: Option<usize>) -> Option<usize> {
        Some(self.0)
    }
}

/// Everything `compile` consults besides the plan and the config.
pub struct Collaborators {
    pub loaders: Box<dyn LoaderCapabilities>,
    pub partitions: Box<dyn PartitionCounter>,
}

impl Collaborators {
    pub fn new(
        loaders: impl LoaderCapabilities + 'static,
        partitions: impl PartitionCounter + 'static,
    ) -> Self {
        Self {
            loaders: Box::new(loaders),
            partitions: Box::new(partitions),
        }
    }

    /// Capabilities named in the config; skewed-join fanout falls back to
    /// the requested count.
    pub fn from_config(config: &CompilerConfig) -> Self {
        let caps = StaticCapabilities {
            indexing: config.indexed_loaders.iter().cloned().collect(),
            collected_group: config.collected_group_loaders.iter().cloned().collect(),
        };
        Self::new(caps, RequestedOrDefault)
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(StaticCapabilities::default(), RequestedOrDefault)
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_are_keyed_by_loader_name() {
        let caps = StaticCapabilities::new().with_indexing("OrcLoader");
        assert!(caps.supports_indexing(&FuncSpec::with_args("OrcLoader", ["x"])));
        assert!(!caps.supports_indexing(&FuncSpec::new("PigStorage")));
        assert!(!caps.supports_collected_group(&FuncSpec::new("OrcLoader")));
    }

    #[test]
    fn config_lists_become_capabilities() {
        let config = CompilerConfig {
            collected_group_loaders: vec!["Zebra".into()],
            ..Default::default()
        };
        let collab = Collaborators::from_config(&config);
        assert!(collab.loaders.supports_collected_group(&FuncSpec::new("Zebra")));
        assert!(!collab.loaders.supports_indexing(&FuncSpec::new("Zebra")));
    }

    #[test]
    fn requested_or_default_never_returns_zero() {
        assert_eq!(RequestedOrDefault.fanout(None, Some(0)), Some(1));
        assert_eq!(RequestedOrDefault.fanout(Some(5), Some(2)), Some(5));
        assert_eq!(RequestedOrDefault.fanout(None, None), None);
        assert_eq!(FixedFanout(7).fanout(Some(5), None), Some(7));
    }
}
