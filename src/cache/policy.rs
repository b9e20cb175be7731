//! Cache Eviction Strategies
//!
//! Each strategy is a pure predicate over a layer's current usage. Deleting
//! entries is the layer's job; a strategy only answers "should the
//! least-recently-used entry go?".

use std::fmt::Debug;
use std::time::Duration;

use serde::Deserialize;

/// Size prefixes for configuring byte limits
///
/// ```
/// use layercache::cache::{MaxCacheSize, GB};
/// let limit = MaxCacheSize::new(GB);
/// ```
pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;
pub const GB: u64 = MB * 1024;

/// Read-only view of a layer that strategies are evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerUsage {
    /// Idle time of the least-recently-used entry (`None` when empty)
    pub tail_idle: Option<Duration>,
    /// Tracked byte total
    pub bytes: u64,
    /// Tracked item count
    pub items: u64,
}

/// Decides whether a layer's least-recently-used entry should be evicted
pub trait EvictionStrategy: Debug + Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// True while the layer should keep evicting from its tail
    fn should_evict(&self, usage: &LayerUsage) -> bool;
}

/// Evicts entries that have not been accessed for longer than `max_idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastAccess {
    max_idle: Duration,
}

impl LastAccess {
    pub fn new(max_idle: Duration) -> Self {
        Self { max_idle }
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }
}

impl EvictionStrategy for LastAccess {
    fn name(&self) -> &'static str {
        "last-access"
    }

    fn should_evict(&self, usage: &LayerUsage) -> bool {
        // An empty layer has no tail to age out
        usage.tail_idle.is_some_and(|idle| idle > self.max_idle)
    }
}

/// Evicts in recency order while the tracked byte total exceeds `max_bytes`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxCacheSize {
    max_bytes: u64,
}

impl MaxCacheSize {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

impl EvictionStrategy for MaxCacheSize {
    fn name(&self) -> &'static str {
        "max-cache-size"
    }

    fn should_evict(&self, usage: &LayerUsage) -> bool {
        usage.bytes > self.max_bytes
    }
}

/// Evicts in recency order while more than `max_items` entries are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxItems {
    max_items: u64,
}

impl MaxItems {
    pub fn new(max_items: u64) -> Self {
        Self { max_items }
    }

    pub fn max_items(&self) -> u64 {
        self.max_items
    }
}

impl EvictionStrategy for MaxItems {
    fn name(&self) -> &'static str {
        "max-items"
    }

    fn should_evict(&self, usage: &LayerUsage) -> bool {
        usage.items > self.max_items
    }
}

/// Declarative strategy description, as found in settings files
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum EvictionConfig {
    /// See [`LastAccess`]
    LastAccess { max_idle_secs: u64 },
    /// See [`MaxCacheSize`]
    MaxCacheSize { max_bytes: u64 },
    /// See [`MaxItems`]
    MaxItems { max_items: u64 },
}

impl EvictionConfig {
    /// Instantiate the described strategy
    pub fn build(&self) -> Box<dyn EvictionStrategy> {
        match *self {
            EvictionConfig::LastAccess { max_idle_secs } => {
                Box::new(LastAccess::new(Duration::from_secs(max_idle_secs)))
            }
            EvictionConfig::MaxCacheSize { max_bytes } => Box::new(MaxCacheSize::new(max_bytes)),
            EvictionConfig::MaxItems { max_items } => Box::new(MaxItems::new(max_items)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(tail_idle: Option<u64>, bytes: u64, items: u64) -> LayerUsage {
        LayerUsage {
            tail_idle: tail_idle.map(Duration::from_secs),
            bytes,
            items,
        }
    }

    #[test]
    fn test_size_units() {
        assert_eq!(KB, 1024);
        assert_eq!(MB, 1024 * 1024);
        assert_eq!(GB, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_last_access() {
        let strategy = LastAccess::new(Duration::from_secs(60));

        assert!(!strategy.should_evict(&usage(Some(30), 0, 1)));
        assert!(!strategy.should_evict(&usage(Some(60), 0, 1)));
        assert!(strategy.should_evict(&usage(Some(61), 0, 1)));
    }

    #[test]
    fn test_last_access_empty_layer() {
        let strategy = LastAccess::new(Duration::ZERO);
        assert!(!strategy.should_evict(&LayerUsage::default()));
    }

    #[test]
    fn test_max_cache_size() {
        let strategy = MaxCacheSize::new(100);

        assert!(!strategy.should_evict(&usage(None, 0, 0)));
        assert!(!strategy.should_evict(&usage(Some(1), 100, 2)));
        assert!(strategy.should_evict(&usage(Some(1), 101, 2)));
    }

    #[test]
    fn test_max_items() {
        let strategy = MaxItems::new(2);

        assert!(!strategy.should_evict(&usage(Some(1), 10, 2)));
        assert!(strategy.should_evict(&usage(Some(1), 10, 3)));
    }

    #[test]
    fn test_no_strategy_fires_on_empty_layer() {
        let empty = LayerUsage::default();
        let strategies: Vec<Box<dyn EvictionStrategy>> = vec![
            Box::new(LastAccess::new(Duration::ZERO)),
            Box::new(MaxCacheSize::new(0)),
            Box::new(MaxItems::new(0)),
        ];
        for strategy in strategies {
            assert!(!strategy.should_evict(&empty), "{} fired", strategy.name());
        }
    }

    #[test]
    fn test_config_deserialize_and_build() {
        let yaml = r#"
- strategy: last-access
  max_idle_secs: 3600
- strategy: max-cache-size
  max_bytes: 1048576
- strategy: max-items
  max_items: 500
"#;
        let configs: Vec<EvictionConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            configs,
            vec![
                EvictionConfig::LastAccess { max_idle_secs: 3600 },
                EvictionConfig::MaxCacheSize { max_bytes: MB },
                EvictionConfig::MaxItems { max_items: 500 },
            ]
        );

        let names: Vec<_> = configs.iter().map(|c| c.build().name()).collect();
        assert_eq!(names, vec!["last-access", "max-cache-size", "max-items"]);
    }
}
