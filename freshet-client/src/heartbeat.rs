//! Group-membership heartbeat.
//!
//! A background task ticks at a fraction of the session timeout, reporting
//! liveness and pulling the current assignment plan. The plan is kept as an
//! atomically swapped snapshot so `shards()`/`plan_version()` never contend
//! with the tick.
//!
//! Fault handling: a non-retryable fault stops the task and is stored;
//! [`Heartbeat::check_running`] re-raises the stored fault on every call so
//! callers cannot silently miss it. A consumer evicted from the group
//! surfaces as a stored `NotFound`, which the coordinator treats as
//! "membership lost, rejoin".

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use freshet_core::{
    limits, ClientError, ClientResult, GroupMembership, HeartbeatPlan, ShardId, Subscription,
};
use freshet_service::StreamService;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum Status {
    Idle,
    Running,
    Stopped,
    Faulted(ClientError),
}

#[derive(Debug)]
struct Shared {
    status: Status,
    plan: HeartbeatPlan,
}

struct TickControl {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodic group-membership reporter.
pub struct Heartbeat {
    service: Arc<dyn StreamService>,
    subscription: Subscription,
    retry_count: u32,
    shared: Arc<Mutex<Shared>>,
    control: Mutex<Option<TickControl>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Heartbeat {
    /// Creates a heartbeat that is not yet ticking.
    #[must_use]
    pub fn new(
        service: Arc<dyn StreamService>,
        subscription: Subscription,
        retry_count: u32,
    ) -> Self {
        Self {
            service,
            subscription,
            retry_count,
            shared: Arc::new(Mutex::new(Shared {
                status: Status::Idle,
                plan: HeartbeatPlan::default(),
            })),
            control: Mutex::new(None),
        }
    }

    /// Starts ticking under the given membership.
    ///
    /// Resets the tracked plan to the pre-first-response default. Any
    /// previous tick task must have been stopped first.
    pub fn start(&self, membership: &GroupMembership) {
        {
            let mut shared = lock(&self.shared);
            shared.status = Status::Running;
            shared.plan = HeartbeatPlan::default();
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(tick_loop(
            self.service.clone(),
            self.subscription.clone(),
            membership.clone(),
            self.shared.clone(),
            self.retry_count,
            shutdown_rx,
        ));

        if let Some(stale) = lock(&self.control).replace(TickControl { shutdown, task }) {
            stale.task.abort();
        }
    }

    /// Returns true while the tick task is healthy.
    ///
    /// # Errors
    ///
    /// Re-raises the stored fault on every call once the heartbeat has
    /// faulted.
    pub fn check_running(&self) -> ClientResult<bool> {
        match &lock(&self.shared).status {
            Status::Running => Ok(true),
            Status::Idle | Status::Stopped => Ok(false),
            Status::Faulted(fault) => Err(fault.clone()),
        }
    }

    /// Returns the currently assigned shard set.
    #[must_use]
    pub fn shards(&self) -> BTreeSet<ShardId> {
        lock(&self.shared).plan.shard_ids.clone()
    }

    /// Returns the tracked plan version.
    #[must_use]
    pub fn plan_version(&self) -> i64 {
        lock(&self.shared).plan.plan_version
    }

    /// Returns a consistent snapshot of the assignment plan.
    #[must_use]
    pub fn plan(&self) -> HeartbeatPlan {
        lock(&self.shared).plan.clone()
    }

    /// Stops the tick task and waits for it to finish. Idempotent.
    pub async fn stop(&self) {
        let control = lock(&self.control).take();
        if let Some(control) = control {
            let _ = control.shutdown.send(true);
            let _ = control.task.await;
        }
    }
}

async fn tick_loop(
    service: Arc<dyn StreamService>,
    subscription: Subscription,
    membership: GroupMembership,
    shared: Arc<Mutex<Shared>>,
    retry_count: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_millis(limits::heartbeat_interval_ms(
        membership.session_timeout_ms,
    ));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                lock(&shared).status = Status::Stopped;
                return;
            }
            _ = ticker.tick() => {
                let response = service
                    .heartbeat(&subscription, &membership.consumer_id, membership.version_id)
                    .await;
                match response {
                    Ok(plan) => {
                        failures = 0;
                        apply_plan(&shared, plan);
                    }
                    Err(err) => {
                        if !err.is_retryable() {
                            warn!(error = %err, consumer_id = %membership.consumer_id,
                                "heartbeat failed with terminal fault");
                            lock(&shared).status = Status::Faulted(err);
                            return;
                        }
                        failures += 1;
                        if failures > retry_count {
                            warn!(error = %err, failures, "heartbeat retries exhausted");
                            lock(&shared).status = Status::Faulted(err);
                            return;
                        }
                        warn!(error = %err, failures, "heartbeat failed, will retry");
                    }
                }
            }
        }
    }
}

fn apply_plan(shared: &Mutex<Shared>, plan: HeartbeatPlan) {
    let mut shared = lock(shared);
    if plan.plan_version < shared.plan.plan_version {
        // Protocol violation; keep the higher version.
        warn!(
            tracked = shared.plan.plan_version,
            received = plan.plan_version,
            "heartbeat plan version went backwards, ignoring response"
        );
        return;
    }
    debug!(version = plan.plan_version, shards = plan.shard_ids.len(), "heartbeat plan updated");
    shared.plan = plan;
}

#[cfg(test)]
mod tests {
    use freshet_service::{Endpoint, SimulatedService};

    use super::*;

    const STEP: Duration = Duration::from_millis(500);

    fn membership() -> GroupMembership {
        GroupMembership {
            consumer_id: "consumer-1".to_string(),
            version_id: 1,
            // A ~3.3s tick period.
            session_timeout_ms: 10_000,
        }
    }

    fn heartbeat(service: &SimulatedService) -> Heartbeat {
        Heartbeat::new(
            Arc::new(service.clone()),
            Subscription::new("test_project", "test_topic", "test_sub"),
            3,
        )
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(STEP).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reports_assigned_shards() {
        let service = SimulatedService::new();
        service.set_plan(&["0", "1", "2"], 1);

        let hb = heartbeat(&service);
        hb.start(&membership());
        assert!(hb.check_running().unwrap());

        wait_until(|| !hb.shards().is_empty()).await;
        assert_eq!(hb.shards().len(), 3);
        assert_eq!(hb.plan_version(), 1);
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_lost_stops_ticking() {
        let service = SimulatedService::new();
        service.fail_always(
            Endpoint::Heartbeat,
            ClientError::NotFound {
                resource: "consumer",
                name: "consumer-1".to_string(),
            },
        );

        let hb = heartbeat(&service);
        hb.start(&membership());

        wait_until(|| hb.check_running().is_err()).await;
        assert!(matches!(
            hb.check_running().unwrap_err(),
            ClientError::NotFound { .. }
        ));
        // Non-retryable: the task gave up after a single request.
        assert_eq!(service.calls(Endpoint::Heartbeat), 1);
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_fault_is_sticky() {
        let service = SimulatedService::new();
        service.fail_always(
            Endpoint::Heartbeat,
            ClientError::session_invalid("offset has been reset"),
        );

        let hb = heartbeat(&service);
        hb.start(&membership());

        wait_until(|| hb.check_running().is_err()).await;
        let first = hb.check_running().unwrap_err();
        let second = hb.check_running().unwrap_err();
        assert_eq!(first, ClientError::session_invalid("offset has been reset"));
        assert_eq!(first, second);
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_faults_bounded() {
        let service = SimulatedService::new();
        service.fail_always(Endpoint::Heartbeat, ClientError::service("internal error"));

        let hb = heartbeat(&service);
        hb.start(&membership());

        wait_until(|| hb.check_running().is_err()).await;
        // The first attempt plus retry_count retries.
        assert_eq!(service.calls(Endpoint::Heartbeat), 4);
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_version_never_regresses() {
        let service = SimulatedService::new();
        service.set_plan(&["0", "1"], 5);

        let hb = heartbeat(&service);
        hb.start(&membership());
        wait_until(|| hb.plan_version() == 5).await;

        // A stale response must not roll the plan back.
        service.set_plan(&["9"], 3);
        let seen = service.calls(Endpoint::Heartbeat);
        wait_until(|| service.calls(Endpoint::Heartbeat) > seen + 1).await;

        assert_eq!(hb.plan_version(), 5);
        assert_eq!(hb.shards().len(), 2);
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let service = SimulatedService::new();
        let hb = heartbeat(&service);
        hb.start(&membership());

        hb.stop().await;
        hb.stop().await;
        assert!(!hb.check_running().unwrap());
    }
}
