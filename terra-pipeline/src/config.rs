use camino::Utf8PathBuf;
use dem_core::Bounds;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    time::Duration,
};

/// The closed sum type for region kinds (spec §3, §9).
///
/// Controls which boundary catalog a region's polygon is resolved
/// from and which datasets are eligible for it; nothing else. Every
/// `match` over this type in this crate is exhaustive by construction
/// — an unmatched variant is a compile error, not a silent `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    /// A U.S. state or territory.
    UsaState,
    /// A sovereign country.
    Country,
    /// A sub-state/sub-country feature such as a park or island.
    Area,
}

/// Read-only per-region configuration, loaded once at startup (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Stable identifier, e.g. `"tennessee"`.
    pub region_id: String,
    /// Human-readable name, e.g. `"Tennessee"`.
    pub display_name: String,
    /// Geographic bounds to request tiles and merge a raster over.
    pub bounds: Bounds,
    /// Region kind.
    pub region_type: RegionType,
    /// Parent region id, meaningful only for `Area`.
    pub parent_region_id: Option<String>,
    /// Region ids wholly contained within this one, if tracked.
    pub contained_region_ids: Option<Vec<String>>,
}

/// Read-only in-memory registry of every known region.
///
/// Loaded once; the pipeline controller fails fast with
/// [`crate::PipelineError::UnknownRegion`] for any id not present here.
#[derive(Debug, Clone, Default)]
pub struct RegionRegistry {
    regions: HashMap<String, RegionConfig>,
}

impl RegionRegistry {
    /// Builds a registry from an explicit list of region configs.
    pub fn new(regions: impl IntoIterator<Item = RegionConfig>) -> Self {
        Self {
            regions: regions
                .into_iter()
                .map(|r| (r.region_id.clone(), r))
                .collect(),
        }
    }

    /// Looks up a region by id.
    pub fn get(&self, region_id: &str) -> Option<&RegionConfig> {
        self.regions.get(region_id)
    }

    /// Iterates every known region, optionally filtered by type.
    pub fn list(&self, filter: Option<RegionType>) -> Vec<&RegionConfig> {
        let mut out: Vec<&RegionConfig> = self
            .regions
            .values()
            .filter(|r| filter.map_or(true, |t| r.region_type == t))
            .collect();
        out.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        out
    }
}

/// Bounded exponential backoff for tile downloads (spec §4.5, §5).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single retry delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to use before attempt number `attempt` (1-based; attempt 1
    /// never sleeps before it since it's the first try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        let scaled = self.base_delay.saturating_mul(1u32 << exp);
        scaled.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Cooperative cancellation flag checked between stages and at tile
/// boundaries (spec §5).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Builds a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Minimum interval between sequential tile requests for a dataset,
/// the orchestrator's only backpressure knob (spec §5).
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimit {
    /// Minimum spacing between requests to the same dataset's downloader.
    pub min_interval: Duration,
}

/// Explicit, threaded-through-every-stage replacement for the global
/// mutable state spec §9 calls out ("Global mutable state → per-run
/// controller"). Every stage function takes a `&PipelineContext`
/// instead of reaching for ambient config.
#[derive(Clone)]
pub struct PipelineContext {
    /// Root directory for `data/` and `exports/` (spec §6 filesystem
    /// layout), relative paths in this crate are resolved against it.
    pub root: Utf8PathBuf,
    /// Region registry, read-only after construction.
    pub regions: Arc<RegionRegistry>,
    /// Retry/backoff policy for tile downloads.
    pub retry_policy: RetryPolicy,
    /// Per-dataset minimum request interval.
    pub rate_limit: RateLimit,
    /// Cooperative cancellation flag.
    pub cancellation: CancellationToken,
    /// Optional per-stage timeout; disabled (`None`) by default (spec §5).
    pub stage_timeout: Option<Duration>,
}

impl PipelineContext {
    /// Builds a context rooted at `root` with an explicit region registry
    /// and otherwise-default policies.
    pub fn new(root: impl Into<Utf8PathBuf>, regions: RegionRegistry) -> Self {
        Self {
            root: root.into(),
            regions: Arc::new(regions),
            retry_policy: RetryPolicy::default(),
            rate_limit: RateLimit::default(),
            cancellation: CancellationToken::new(),
            stage_timeout: None,
        }
    }

    /// `data/raw/{dataset}/tiles/`
    pub fn raw_tiles_dir(&self, dataset_tag: &str) -> Utf8PathBuf {
        self.root.join("data").join("raw").join(dataset_tag).join("tiles")
    }

    /// `data/merged/{dataset}/`
    pub fn merged_dir(&self, dataset_tag: &str) -> Utf8PathBuf {
        self.root.join("data").join("merged").join(dataset_tag)
    }

    /// `data/clipped/{dataset}/`
    pub fn clipped_dir(&self, dataset_tag: &str) -> Utf8PathBuf {
        self.root.join("data").join("clipped").join(dataset_tag)
    }

    /// `data/processed/{dataset}/`
    pub fn processed_dir(&self, dataset_tag: &str) -> Utf8PathBuf {
        self.root.join("data").join("processed").join(dataset_tag)
    }

    /// `data/boundaries/.cache/`
    pub fn boundary_cache_dir(&self) -> Utf8PathBuf {
        self.root.join("data").join("boundaries").join(".cache")
    }

    /// `exports/regions/`
    pub fn exports_dir(&self) -> Utf8PathBuf {
        self.root.join("exports").join("regions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> RegionRegistry {
        RegionRegistry::new([
            RegionConfig {
                region_id: "tennessee".into(),
                display_name: "Tennessee".into(),
                bounds: Bounds::new(-90.3, 34.98, -81.6, 36.68).unwrap(),
                region_type: RegionType::UsaState,
                parent_region_id: None,
                contained_region_ids: None,
            },
            RegionConfig {
                region_id: "france".into(),
                display_name: "France".into(),
                bounds: Bounds::new(-5.2, 41.3, 9.6, 51.1).unwrap(),
                region_type: RegionType::Country,
                parent_region_id: None,
                contained_region_ids: None,
            },
        ])
    }

    #[test]
    fn registry_lookup_and_filter() {
        let reg = sample_registry();
        assert!(reg.get("tennessee").is_some());
        assert!(reg.get("atlantis").is_none());
        let states = reg.list(Some(RegionType::UsaState));
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].region_id, "tennessee");
    }

    #[test]
    fn retry_policy_backoff_is_bounded_and_monotonic() {
        let policy = RetryPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..=policy.max_attempts {
            let d = policy.delay_for_attempt(attempt);
            assert!(d >= prev || d == policy.max_delay);
            assert!(d <= policy.max_delay);
            prev = d;
        }
    }

    #[test]
    fn cancellation_token_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
