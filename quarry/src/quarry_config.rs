//! Process level settings of the storage layer.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{atomic, Atomic, ReadExecutor, Timestamp, WriteExecutor};
use crate::validation::FeatureVersion;

/// How capped eviction relates to the write that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvictionPolicy {
    /// Eviction commits in a side transaction of its own. Conflicts abandon
    /// the eviction, a later write retries it.
    Independent,
    /// Eviction is part of the triggering write's unit of work and is
    /// replicated with it.
    #[default]
    Integrated,
}

impl Display for EvictionPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Independent => write!(f, "independent"),
            EvictionPolicy::Integrated => write!(f, "integrated"),
        }
    }
}

/// Role of this node in a sharded cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClusterRole {
    #[default]
    None,
    Shard,
    ConfigServer,
}

/// Shared, cheaply clonable configuration.
///
/// # Examples
///
/// ```rust,ignore
/// use quarry::quarry_config::{EvictionPolicy, QuarryConfig};
///
/// let config = QuarryConfig::new();
/// config.set_eviction_policy(EvictionPolicy::Independent);
/// ```
#[derive(Clone, Default)]
pub struct QuarryConfig {
    inner: Arc<QuarryConfigInner>,
}

impl QuarryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.inner.eviction_policy.read_with(|it| *it)
    }

    pub fn set_eviction_policy(&self, policy: EvictionPolicy) {
        log::debug!("Capped eviction policy set to {}", policy);
        self.inner.eviction_policy.write_with(|it| *it = policy);
    }

    pub fn cluster_role(&self) -> ClusterRole {
        self.inner.cluster_role.read_with(|it| *it)
    }

    pub fn set_cluster_role(&self, role: ClusterRole) {
        self.inner.cluster_role.write_with(|it| *it = role);
    }

    /// Newest validator language version collections may use, if pinned.
    pub fn validator_feature_ceiling(&self) -> Option<FeatureVersion> {
        self.inner.feature_ceiling.read_with(|it| *it)
    }

    pub fn set_validator_feature_ceiling(&self, ceiling: Option<FeatureVersion>) {
        self.inner.feature_ceiling.write_with(|it| *it = ceiling);
    }

    /// Longest single sleep of a reader waiting on a capped insert notifier.
    pub fn capped_wait_granularity(&self) -> Duration {
        Duration::from_millis(self.inner.wait_granularity_ms.load(Ordering::Relaxed))
    }

    pub fn set_capped_wait_granularity(&self, granularity: Duration) {
        let millis = granularity.as_millis().max(1) as u64;
        self.inner.wait_granularity_ms.store(millis, Ordering::Relaxed);
    }

    /// Hands out strictly increasing timestamps used as log slots.
    pub fn next_op_time(&self) -> Timestamp {
        self.inner.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reserves `count` consecutive log slots.
    pub fn reserve_op_times(&self, count: usize) -> Vec<Timestamp> {
        let first = self.inner.clock.fetch_add(count as u64, Ordering::SeqCst) + 1;
        (first..first + count as u64).collect()
    }
}

struct QuarryConfigInner {
    eviction_policy: Atomic<EvictionPolicy>,
    cluster_role: Atomic<ClusterRole>,
    feature_ceiling: Atomic<Option<FeatureVersion>>,
    wait_granularity_ms: AtomicU64,
    clock: AtomicU64,
}

impl Default for QuarryConfigInner {
    fn default() -> Self {
        QuarryConfigInner {
            eviction_policy: atomic(EvictionPolicy::default()),
            cluster_role: atomic(ClusterRole::default()),
            feature_ceiling: atomic(None),
            wait_granularity_ms: AtomicU64::new(100),
            clock: AtomicU64::new(0),
        }
    }
}
