use std::time::Duration;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod patch;

pub(crate) mod colors;

mod error;

pub use error::*;

/// The default interval for requeuing an in-flight RayJob (spec.md §4.1), overridable at
/// startup via `--requeue-interval-secs`/`REQUEUE_INTERVAL_SECS`.
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(3);
static PROBE_INTERVAL_OVERRIDE: std::sync::OnceLock<Duration> = std::sync::OnceLock::new();

/// Sets the requeue interval override once at startup. Later calls are no-ops, matching
/// `OnceLock::set`'s semantics.
pub fn set_probe_interval(interval: Duration) {
    let _ = PROBE_INTERVAL_OVERRIDE.set(interval);
}

pub(crate) fn probe_interval() -> Duration {
    *PROBE_INTERVAL_OVERRIDE.get().unwrap_or(&DEFAULT_PROBE_INTERVAL)
}

/// Name of the kubernetes resource manager, used as the server-side-apply field manager.
pub(crate) const MANAGER_NAME: &str = rayjob_common::COMPONENT_NAME;

/// Safety margin added to the TTL-derived requeue-after in `Complete`, to absorb clock skew
/// between the controller and the apiserver (spec.md §4.6).
pub(crate) const SHUTDOWN_SAFETY_MARGIN: Duration = Duration::from_secs(2);

/// Hashes a spec for drift-detection logging only (spec.md §9 Open Question 3: the controller
/// never acts on drift, it only logs it).
pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}
