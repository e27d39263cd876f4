//! Wait-until-stable polling for asynchronous cloud resources
//!
//! Octavia creates load balancers, listeners, and pools asynchronously; a
//! resource rejects further mutation while its provisioning status is in a
//! `PENDING_*` state. This module drives a status probe until the resource
//! leaves the pending set, with a fixed interval and a bounded number of
//! attempts. Exceeding the bound is a hard failure, not an infinite wait.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::cloud::{CloudError, ResourceRecord};
use crate::{Error, Result, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS};

/// Configuration for status polling
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Maximum number of status probes before giving up
    pub max_attempts: u32,
    /// Fixed delay between probes
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_ATTEMPTS,
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl PollConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }
}

/// Probe a resource until its provisioning status leaves the pending set.
///
/// Returns the first record whose status is not pending; the caller inspects
/// it for `ACTIVE` vs. error states. A probe failure is wrapped into the
/// domain error immediately, without further retries. If every probe up to
/// the bound reports a pending status, the resource is declared stuck.
///
/// # Arguments
/// * `config` - Attempt bound and probe interval
/// * `resource` - Description of the resource, for logging and errors
/// * `probe` - Zero-argument status check
pub async fn wait_not_pending<F, Fut>(
    config: &PollConfig,
    resource: &str,
    mut probe: F,
) -> Result<ResourceRecord>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<ResourceRecord, CloudError>>,
{
    for attempt in 1..=config.max_attempts {
        let record = probe()
            .await
            .map_err(|e| Error::cloud(format!("checking status of {}", resource), e))?;

        match &record.provisioning_status {
            Some(status) if status.is_pending() => {
                debug!(
                    resource = %resource,
                    status = %status,
                    attempt = attempt,
                    "resource still pending"
                );
                tokio::time::sleep(config.interval).await;
            }
            _ => return Ok(record),
        }
    }

    Err(Error::stuck_pending(resource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::cloud::ProvisioningStatus;

    fn record(status: &str) -> ResourceRecord {
        ResourceRecord {
            provisioning_status: Some(ProvisioningStatus::from(status.to_string())),
            ..Default::default()
        }
    }

    fn quick(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            interval: Duration::from_millis(1),
        }
    }

    /// A probe that replays a fixed sequence of statuses and counts calls
    fn scripted(statuses: &[&str]) -> (Arc<Mutex<VecDeque<ResourceRecord>>>, Arc<Mutex<u32>>) {
        let queue: VecDeque<ResourceRecord> = statuses.iter().map(|s| record(s)).collect();
        (Arc::new(Mutex::new(queue)), Arc::new(Mutex::new(0)))
    }

    #[tokio::test]
    async fn returns_first_non_pending_status() {
        let (queue, calls) = scripted(&[
            "PENDING_CREATE",
            "PENDING_UPDATE",
            "PENDING_DELETE",
            "ACTIVE",
        ]);

        let result = wait_not_pending(&quick(10), "load balancer", || {
            let queue = queue.clone();
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Ok(queue.lock().unwrap().pop_front().unwrap())
            }
        })
        .await
        .unwrap();

        assert_eq!(
            result.provisioning_status,
            Some(ProvisioningStatus::Active)
        );
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn returns_immediately_when_already_stable() {
        let (queue, calls) = scripted(&["ACTIVE"]);
        wait_not_pending(&quick(10), "pool", || {
            let queue = queue.clone();
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Ok(queue.lock().unwrap().pop_front().unwrap())
            }
        })
        .await
        .unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn error_statuses_are_returned_not_retried() {
        let (queue, _calls) = scripted(&["ERROR"]);
        let result = wait_not_pending(&quick(10), "pool", || {
            let queue = queue.clone();
            async move { Ok(queue.lock().unwrap().pop_front().unwrap()) }
        })
        .await
        .unwrap();
        assert_eq!(result.provisioning_status, Some(ProvisioningStatus::Error));
    }

    #[tokio::test]
    async fn always_pending_raises_stuck_error() {
        let calls = Arc::new(Mutex::new(0u32));
        let result = wait_not_pending(&quick(3), "load balancer", || {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Ok(record("PENDING_DELETE"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::StuckPending { .. })));
        // the probe runs exactly once per allowed attempt
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn probe_failure_is_wrapped_without_retry() {
        let calls = Arc::new(Mutex::new(0u32));
        let result = wait_not_pending(&quick(5), "pool", || {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Err(CloudError::CommandFailed {
                    command: "openstack loadbalancer pool show".to_string(),
                    stderr: "boom".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cloud { .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_status_counts_as_stable() {
        // some kinds provision synchronously and report no status at all
        let result = wait_not_pending(&quick(3), "listener", || async {
            Ok(ResourceRecord::default())
        })
        .await;
        assert!(result.is_ok());
    }
}
