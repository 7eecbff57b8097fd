use std::{num::NonZeroUsize, time::Duration};

use k8s_openapi::{api::core::v1::Node, apimachinery::pkg::util::intstr::IntOrString};
use serde::Deserialize;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    cli::{Cli, Executor},
    nodes::UpdateOrderRecorder,
    poll::PollSpec,
    resource::{Resource, ResourceList},
    set_field, Effect, Error, Result,
};

pub const MACHINE_CONFIG_POOL: &str = "machineconfigpool";
pub const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Rollout budget per machine in the pool.
pub const TIMEOUT_PER_MACHINE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Pool status, read fresh from the cluster on every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolStatus {
    pub machine_count: u32,
    pub degraded_machine_count: u32,
    pub updated_machine_count: u32,
    pub ready_machine_count: u32,
    pub unavailable_machine_count: u32,
    pub conditions: Vec<PoolCondition>,
}

impl PoolStatus {
    /// Whether condition `type_` is present with status `True`.
    pub fn condition(&self, type_: &str) -> bool {
        self.conditions
            .iter()
            .any(|condition| condition.type_ == type_ && condition.status == "True")
    }

    pub fn updated(&self) -> bool {
        self.condition("Updated")
    }

    pub fn updating(&self) -> bool {
        self.condition("Updating")
    }

    pub fn degraded(&self) -> bool {
        self.condition("Degraded")
    }

    pub fn timeout(&self) -> Duration {
        TIMEOUT_PER_MACHINE * self.machine_count.max(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSpec {
    pub max_unavailable: Option<IntOrString>,
    pub paused: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PoolObject {
    pub spec: PoolSpec,
    pub status: PoolStatus,
}

/// Resolve a pool's `maxUnavailable` against its machine count.
///
/// Percentages round down. Unset, zero and tiny percentages all allow one
/// machine at a time.
pub fn resolve_max_unavailable(
    value: Option<&IntOrString>,
    machine_count: u32,
) -> Result<NonZeroUsize> {
    let resolved = match value {
        None => 1,
        Some(IntOrString::Int(count)) => {
            usize::try_from(*count).map_err(|_| Error::InvalidMaxUnavailable(count.to_string()))?
        }
        Some(IntOrString::String(value)) => {
            let percent = value
                .strip_suffix('%')
                .and_then(|percent| percent.parse::<usize>().ok())
                .ok_or_else(|| Error::InvalidMaxUnavailable(value.clone()))?;

            machine_count as usize * percent / 100
        }
    };

    Ok(NonZeroUsize::new(resolved).unwrap_or(NonZeroUsize::MIN))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutState {
    Converging,
    Degraded,
    Converged,
    TimedOut,
}

impl RolloutState {
    /// The transition taken on one tick. Degraded machines win over the
    /// `Updated` condition.
    pub fn evaluate(status: &PoolStatus) -> RolloutState {
        if status.degraded_machine_count != 0 {
            RolloutState::Degraded
        } else if status.updated() {
            RolloutState::Converged
        } else {
            RolloutState::Converging
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != RolloutState::Converging
    }
}

/// A machine config pool.
#[derive(Debug)]
pub struct Pool<E> {
    resource: Resource<E>,
}

impl<E> Clone for Pool<E> {
    fn clone(&self) -> Self {
        Pool {
            resource: self.resource.clone(),
        }
    }
}

impl<E: Executor> Pool<E> {
    pub fn new(cli: Cli<E>, name: &str) -> Self {
        Pool {
            resource: Resource::new(cli, MACHINE_CONFIG_POOL, name),
        }
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn resource(&self) -> &Resource<E> {
        &self.resource
    }

    pub async fn object(&self) -> Result<PoolObject> {
        self.resource.object().await
    }

    pub async fn status(&self) -> Result<PoolStatus> {
        Ok(self.object().await?.status)
    }

    pub async fn max_unavailable(&self) -> Result<NonZeroUsize> {
        let pool = self.object().await?;
        resolve_max_unavailable(pool.spec.max_unavailable.as_ref(), pool.status.machine_count)
    }

    /// The pool's nodes, selected by their role label.
    pub fn node_list(&self) -> ResourceList<E> {
        let mut list = ResourceList::new(self.resource.cli().clone(), "node");
        list.by_label(&format!("{ROLE_LABEL_PREFIX}{}", self.name()));
        list
    }

    pub async fn nodes(&self) -> Result<Vec<Node>> {
        self.node_list().items().await
    }

    /// Node names in the order a rollout is expected to update them: by
    /// zone, then oldest first.
    pub async fn expected_update_order(&self) -> Result<Vec<String>> {
        let mut list = self.node_list();
        list.sort_by_zone().sort_by_timestamp();
        list.names().await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<Effect> {
        set_field(&self.resource, "/spec/paused", serde_json::Value::Bool(paused)).await
    }

    pub fn rollout(&self) -> Rollout<'_, E> {
        Rollout {
            pool: self,
            interval: Duration::from_secs(10),
            timeout: None,
            max_unavailable: None,
            track_updates: false,
            expected_order: vec![],
        }
    }

    /// Wait for the pool to finish rolling out its current configuration.
    pub async fn wait_for_complete(&self, interval: Duration) -> Result<RolloutReport> {
        self.rollout().interval(interval).wait().await
    }
}

/// Outcome of a converged rollout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutReport {
    /// Nodes in the order they were first seen updating. Empty unless
    /// update tracking was enabled.
    pub observed_order: Vec<String>,
    /// Most nodes seen updating at once.
    pub peak_updating: usize,
    pub ticks: usize,
}

struct Progress {
    first: Option<PoolStatus>,
    recorder: UpdateOrderRecorder,
    ticks: usize,
}

/// Waits for a pool rollout, optionally enforcing its parallelism bound.
#[must_use = "a rollout does nothing until wait() is awaited"]
pub struct Rollout<'a, E> {
    pool: &'a Pool<E>,
    interval: Duration,
    timeout: Option<Duration>,
    max_unavailable: Option<NonZeroUsize>,
    track_updates: bool,
    expected_order: Vec<String>,
}

impl<'a, E: Executor> Rollout<'a, E> {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the timeout derived from the pool's machine count. It also
    /// bounds how long the pool may stay unreadable at the start.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Record the order nodes start updating in, and fail once more than
    /// `max_unavailable` update at once. `None` uses the pool's own setting.
    pub fn track_updates(mut self, max_unavailable: Option<NonZeroUsize>) -> Self {
        self.track_updates = true;
        self.max_unavailable = max_unavailable;
        self
    }

    /// Order nodes that start updating in the same tick the way `expected`
    /// does.
    pub fn expected_order(mut self, expected: Vec<String>) -> Self {
        self.expected_order = expected;
        self
    }

    /// Failed reads are retried. Until the pool has been read once, the wait
    /// is bounded by the explicit timeout or [`TIMEOUT_PER_MACHINE`].
    pub async fn wait(self) -> Result<RolloutReport> {
        let pool = self.pool;
        let name = pool.name().to_string();

        let start = Instant::now();
        let mut attempts = 0;

        // The first successful read sizes the timeout and doubles as a tick.
        let object = PollSpec::new(
            self.interval,
            self.timeout.unwrap_or(TIMEOUT_PER_MACHINE),
        )
        .until_ok(&format!("pool {name} to be readable"), || {
            attempts += 1;
            async move { pool.object().await.map_err(|err| err.to_string()) }
        })
        .await?;

        let timeout = self
            .timeout
            .unwrap_or_else(|| object.status.timeout())
            .saturating_sub(start.elapsed());
        let max_unavailable = match (self.track_updates, self.max_unavailable) {
            (false, _) => None,
            (true, Some(max_unavailable)) => Some(max_unavailable),
            (true, None) => Some(resolve_max_unavailable(
                object.spec.max_unavailable.as_ref(),
                object.status.machine_count,
            )?),
        };

        info!(
            "waiting up to {timeout:?} for pool {name} ({} machines) to roll out",
            object.status.machine_count
        );

        let progress = Mutex::new(Progress {
            first: Some(object.status),
            recorder: UpdateOrderRecorder::with_expected_order(&self.expected_order),
            ticks: attempts - 1,
        });
        let progress_ref = &progress;
        let name_ref = name.as_str();

        let result = PollSpec::new(self.interval, timeout)
            .until(&format!("pool {name} to be updated"), move || async move {
                let mut progress = progress_ref.lock().await;
                progress.ticks += 1;

                let status = match progress.first.take() {
                    Some(status) => status,
                    None => pool.status().await?,
                };

                let state = RolloutState::evaluate(&status);
                debug!(
                    "pool {name_ref}: {state:?}, {}/{} updated, {} degraded",
                    status.updated_machine_count,
                    status.machine_count,
                    status.degraded_machine_count
                );

                if state == RolloutState::Degraded {
                    return Err(Error::Degraded {
                        pool: name_ref.to_string(),
                        degraded: status.degraded_machine_count,
                    });
                }

                if let Some(max_unavailable) = max_unavailable {
                    let nodes = pool.nodes().await?;
                    let updating = progress.recorder.observe(&nodes);

                    if updating > max_unavailable.get() {
                        return Err(Error::MaxUnavailableExceeded {
                            pool: name_ref.to_string(),
                            updating,
                            max_unavailable: max_unavailable.get(),
                        });
                    }
                }

                Ok(state == RolloutState::Converged)
            })
            .await;

        let progress = progress.into_inner();

        if let Err(err) = result {
            if err.is_timeout() {
                warn!(
                    "pool {name} {:?} after {} ticks",
                    RolloutState::TimedOut,
                    progress.ticks
                );
            }
            return Err(err);
        }

        info!("pool {name} {:?} after {} ticks", RolloutState::Converged, progress.ticks);

        Ok(RolloutReport {
            peak_updating: progress.recorder.peak(),
            observed_order: progress.recorder.into_observed(),
            ticks: progress.ticks,
        })
    }
}
