//! TerminationPolicy: TTL-gated release of owned resources once a RayJob reaches `Complete`
//! with `ShutdownAfterJobFinishes` set (spec.md §4.6).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kube::Client;
use kube::runtime::controller::Action;
use kube::runtime::events::Recorder;
use rayjob_types::RayJob;
use std::time::Duration;

use super::resources;
use crate::util::{Error, SHUTDOWN_SAFETY_MARGIN};

pub enum ShutdownDecision {
    RequeueAfter(Duration),
    ReleaseNow,
}

/// Given the job's end time, the configured TTL, and the current time, decides whether to
/// release owned resources now or requeue until the TTL elapses.
pub fn decide(end_time: DateTime<Utc>, ttl_seconds: i32, now: DateTime<Utc>) -> ShutdownDecision {
    let shutdown_at = end_time + ChronoDuration::seconds(ttl_seconds.max(0) as i64);
    if shutdown_at > now {
        let remaining = (shutdown_at - now).to_std().unwrap_or(Duration::ZERO);
        ShutdownDecision::RequeueAfter(remaining + SHUTDOWN_SAFETY_MARGIN)
    } else {
        ShutdownDecision::ReleaseNow
    }
}

/// Applies the termination policy for a `Complete` RayJob: releases the cluster (not the
/// already-finished submitter workload) once the TTL has elapsed, or requeues until it does.
pub async fn apply(
    client: Client,
    recorder: &Recorder,
    rayjob: &RayJob,
    now: DateTime<Utc>,
) -> Result<Action, Error> {
    let Some(end_time) = rayjob.status.as_ref().and_then(|s| s.end_time.as_ref()) else {
        return Ok(Action::await_change());
    };
    match decide(end_time.0, rayjob.spec.ttl_seconds_after_finished, now) {
        ShutdownDecision::RequeueAfter(d) => Ok(Action::requeue(d)),
        ShutdownDecision::ReleaseNow => {
            resources::release(client, recorder, rayjob, false).await?;
            Ok(Action::await_change())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs_from_epoch: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs_from_epoch, 0).unwrap()
    }

    #[test]
    fn requeues_until_ttl_elapses() {
        let decision = decide(t(0), 60, t(10));
        match decision {
            ShutdownDecision::RequeueAfter(d) => {
                assert_eq!(d, Duration::from_secs(50) + SHUTDOWN_SAFETY_MARGIN);
            }
            ShutdownDecision::ReleaseNow => panic!("expected requeue"),
        }
    }

    #[test]
    fn releases_once_ttl_has_elapsed() {
        let decision = decide(t(0), 60, t(61));
        assert!(matches!(decision, ShutdownDecision::ReleaseNow));
    }

    #[test]
    fn zero_ttl_releases_immediately_at_end_time() {
        let decision = decide(t(100), 0, t(100));
        assert!(matches!(decision, ShutdownDecision::ReleaseNow));
    }
}
