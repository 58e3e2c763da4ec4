//! The membership lifecycle: join, heartbeat, reconcile, rejoin, leave.
//!
//! # State machine
//!
//! ```text
//!            start_managing
//!                 │
//!                 ▼
//!   ┌────────► Joining ──── UnsupportedVersion (first contact) ───► FellBack
//!   │             │
//!   │             ▼
//!   │        Reconciling ◄──────────────┐
//!   │             │                     │ new assignment
//!   │             ▼                     │
//!   │        Heartbeating ──────────────┘
//!   │             │ any error
//!   │             ▼
//!   └── lose partitions, clear tracker, back off
//!
//!   stop_managing: any state ──► Leaving ──► Stopped
//! ```
//!
//! # Protocol support
//!
//! The first protocol-level answer from the coordinator settles whether the
//! heartbeat protocol is available. An `UnsupportedVersion` error on that
//! first answer makes the manager exit with
//! [`ManageExit::FellBackToLegacy`]; any other answer confirms support for
//! the lifetime of the manager. Transport failures settle nothing. Waiters
//! on [`GroupManager::wait_ready`] are released as soon as support is
//! settled either way.
//!
//! # Errors
//!
//! Every error that ends a session is handled the same way: applied
//! partitions are revoked, the tracked assignment is cleared, and the member
//! rejoins with a fresh identity after an exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::assignment::{Assignment, AssignmentTracker};
use super::engine::HeartbeatEngine;
use super::feed::{AssignmentFeed, AssignmentUpdate};
use super::membership::MemberGeneration;
use super::subscription::Subscription;
use super::traits::{GroupTransport, PartitionConsumer, TopicDirectory};
use crate::config::GroupConfig;
use crate::error::{GroupError, Result, TransportError};
use crate::messages::HeartbeatRequest;
use crate::types::{MemberEpoch, generate_member_id};
use crate::{metrics, retry};

/// Whether the coordinator speaks the heartbeat-driven protocol.
///
/// Moves from `Unknown` to `Confirmed` or `Legacy` once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolSupport {
    #[default]
    Unknown,
    Confirmed,
    Legacy,
}

/// Coarse lifecycle position, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberState {
    /// Constructed but not yet managing.
    #[default]
    Idle,
    Joining,
    Heartbeating,
    /// Applying a new assignment to the partition consumer.
    Reconciling,
    /// Waiting out the backoff after a failed session.
    Backoff,
    Leaving,
    Stopped,
    /// Handed over to the legacy group protocol.
    FellBack,
}

/// Why the management loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageExit {
    Shutdown,
    FellBackToLegacy,
}

enum SessionEnd {
    Reassigned(Duration),
    Failed(GroupError),
    Shutdown,
}

/// Drives one consumer group membership.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use groupbeat::config::GroupConfig;
/// # use groupbeat::group::{GroupManager, GroupTransport, PartitionConsumer, ProtocolSupport,
/// #     Subscription, TopicDirectory};
/// # async fn run(
/// #     transport: Arc<dyn GroupTransport>,
/// #     topics: Arc<dyn TopicDirectory>,
/// #     consumer: Arc<dyn PartitionConsumer>,
/// # ) -> groupbeat::error::Result<()> {
/// let manager = GroupManager::new(
///     GroupConfig::new("orders"),
///     Arc::new(Subscription::topics(["orders"])),
///     transport,
///     topics,
///     consumer,
/// )?;
/// manager.start_managing()?;
/// if manager.wait_ready().await == ProtocolSupport::Legacy {
///     // run the classic join/sync protocol instead
/// }
/// manager.stop_managing().await;
/// # Ok(())
/// # }
/// ```
pub struct GroupManager {
    config: GroupConfig,
    subscription: Arc<Subscription>,
    transport: Arc<dyn GroupTransport>,
    topics: Arc<dyn TopicDirectory>,
    consumer: Arc<dyn PartitionConsumer>,

    generation: Arc<MemberGeneration>,
    tracker: Arc<AssignmentTracker>,
    feed: Arc<AssignmentFeed>,

    support: watch::Sender<ProtocolSupport>,
    state: RwLock<MemberState>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<ManageExit>>>,
    leave_error: Mutex<Option<GroupError>>,
}

impl GroupManager {
    /// Create a manager. Nothing is sent until [`start_managing`](Self::start_managing).
    pub fn new(
        config: GroupConfig,
        subscription: Arc<Subscription>,
        transport: Arc<dyn GroupTransport>,
        topics: Arc<dyn TopicDirectory>,
        consumer: Arc<dyn PartitionConsumer>,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|errors| GroupError::Config(errors.join("; ")))?;

        let (support, _) = watch::channel(ProtocolSupport::Unknown);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            config,
            subscription,
            transport,
            topics,
            consumer,
            generation: Arc::new(MemberGeneration::new()),
            tracker: Arc::new(AssignmentTracker::new()),
            feed: Arc::new(AssignmentFeed::new()),
            support,
            state: RwLock::new(MemberState::Idle),
            shutdown_tx,
            task: Mutex::new(None),
            leave_error: Mutex::new(None),
        }))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn state(&self) -> MemberState {
        *self.state.read()
    }

    pub fn protocol_support(&self) -> ProtocolSupport {
        *self.support.borrow()
    }

    pub fn generation(&self) -> Arc<MemberGeneration> {
        Arc::clone(&self.generation)
    }

    /// The assignment the member currently tracks; empty if none.
    pub fn current_assignment(&self) -> Assignment {
        self.tracker.snapshot_clone()
    }

    /// Ordered stream of accepted assignments.
    pub fn assignments(&self) -> Arc<AssignmentFeed> {
        Arc::clone(&self.feed)
    }

    /// The outcome of the last leave attempt, if it failed.
    pub fn leave_error(&self) -> Option<GroupError> {
        self.leave_error.lock().clone()
    }

    /// Wait until protocol support is settled.
    pub async fn wait_ready(&self) -> ProtocolSupport {
        let mut rx = self.support.subscribe();
        // The sender lives as long as `self`, so this only returns once settled.
        let _ = rx.wait_for(|s| *s != ProtocolSupport::Unknown).await;
        *rx.borrow()
    }

    // ------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------

    /// Spawn the management loop.
    ///
    /// If the heartbeat protocol is disabled by configuration, support is
    /// settled as `Legacy` immediately and nothing is spawned.
    pub fn start_managing(self: &Arc<Self>) -> Result<()> {
        if self.feed.is_closed() {
            return Err(GroupError::Config(format!(
                "group manager for {} was already stopped",
                self.config.group_id
            )));
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Err(GroupError::Config(format!(
                "group {} is already being managed",
                self.config.group_id
            )));
        }

        if !self.config.should_use_next_gen() {
            info!(
                group = %self.config.group_id,
                "Heartbeat protocol disabled, using the legacy group protocol"
            );
            self.settle_support(ProtocolSupport::Legacy);
            self.set_state(MemberState::FellBack);
            return Ok(());
        }

        // Subscribe before spawning so a stop issued right away is not missed.
        let shutdown_rx = self.shutdown_tx.subscribe();
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.manage(shutdown_rx).await }));
        Ok(())
    }

    /// Stop the management loop, leave the group and close the assignment feed.
    ///
    /// Returns how the loop ended, or `None` if it was never started.
    pub async fn stop_managing(&self) -> Option<ManageExit> {
        let _ = self.shutdown_tx.send(());
        let handle = self.task.lock().take();

        let exit = match handle {
            Some(handle) => match handle.await {
                Ok(exit) => Some(exit),
                Err(e) => {
                    error!(group = %self.config.group_id, error = %e, "Group management task failed");
                    self.set_state(MemberState::Stopped);
                    None
                }
            },
            None => None,
        };

        if exit == Some(ManageExit::Shutdown) {
            self.leave().await;
            self.set_state(MemberState::Stopped);
        }
        self.feed.close();
        exit
    }

    // ------------------------------------------------------------------
    // Management loop
    // ------------------------------------------------------------------

    async fn manage(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> ManageExit {
        let group = self.config.group_id.clone();
        info!(group = %group, "Beginning to manage the group lifecycle");
        let _unwind = UnwindGuard(self.as_ref());

        let mut engine = HeartbeatEngine::new(
            &self.config,
            Arc::clone(&self.generation),
            Arc::clone(&self.tracker),
            Arc::clone(&self.subscription),
            Arc::clone(&self.topics),
        );
        let mut applied = Assignment::new();
        let mut consecutive_failures: u32 = 0;

        'manage: loop {
            self.set_state(MemberState::Joining);
            let joined = tokio::select! {
                biased;
                _ = shutdown.recv() => break 'manage,
                joined = self.initial_join(&mut engine) => joined,
            };

            // Support is confirmed inside the join, so reaching here still
            // unsettled with UnsupportedVersion means first contact.
            if let Err(e) = &joined {
                if e.is_unsupported_version() && self.protocol_support() == ProtocolSupport::Unknown {
                    warn!(
                        group = %group,
                        error = %e,
                        "Coordinator does not support consumer group heartbeats, falling back to the legacy protocol"
                    );
                    metrics::record_protocol_fallback();
                    self.settle_support(ProtocolSupport::Legacy);
                    self.set_state(MemberState::FellBack);
                    return ManageExit::FellBackToLegacy;
                }
            }

            let mut next = joined;
            let failure = loop {
                match next {
                    Ok(interval) => {
                        consecutive_failures = 0;
                        next = match self
                            .heartbeat_session(&mut engine, &mut applied, interval, &mut shutdown)
                            .await
                        {
                            SessionEnd::Reassigned(interval) => Ok(interval),
                            SessionEnd::Failed(e) => Err(e),
                            SessionEnd::Shutdown => break 'manage,
                        };
                    }
                    Err(e) => break e,
                }
            };

            consecutive_failures = consecutive_failures.saturating_add(1);
            if self
                .fail_wait(failure, consecutive_failures, &mut applied, &mut shutdown)
                .await
            {
                break 'manage;
            }
        }

        self.revoke_all(&mut applied).await;
        info!(group = %group, "Stopped managing the group lifecycle");
        ManageExit::Shutdown
    }

    /// Send the joining heartbeat, reissuing it once if the coordinator
    /// assigned our member id.
    async fn initial_join(&self, engine: &mut HeartbeatEngine) -> Result<Duration> {
        let (member_id, mut reissue) = if self.config.capabilities.client_member_ids {
            (generate_member_id(), false)
        } else {
            (String::new(), true)
        };
        self.generation.store(member_id, MemberEpoch::JOIN);

        loop {
            let result = engine.heartbeat(self.transport.as_ref()).await;
            match &result {
                Err(e) if e.is_unsupported_version() || !e.is_protocol_level() => {}
                _ => self.confirm_support(),
            }
            let outcome = result?;
            if outcome.assignment.is_none() && reissue {
                reissue = false;
                debug!(
                    group = %self.config.group_id,
                    member_id = %self.generation.member_id(),
                    "Reissuing join with the coordinator-assigned member id"
                );
                continue;
            }

            let (member_id, epoch) = self.generation.load();
            info!(
                group = %self.config.group_id,
                member_id = %member_id,
                member_epoch = %epoch,
                assigned = %outcome.assignment.clone().unwrap_or_default(),
                "Joined group"
            );
            if let Some(assignment) = outcome.assignment {
                self.accept_assignment(assignment);
            }
            return Ok(outcome.interval.unwrap_or(self.config.heartbeat_interval));
        }
    }

    async fn heartbeat_session(
        &self,
        engine: &mut HeartbeatEngine,
        applied: &mut Assignment,
        mut interval: Duration,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        // A changed assignment is acknowledged right away.
        let mut wait = if self.reconcile(applied).await {
            Duration::ZERO
        } else {
            interval
        };
        self.set_state(MemberState::Heartbeating);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => return SessionEnd::Shutdown,
                _ = tokio::time::sleep(wait) => {}
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.recv() => return SessionEnd::Shutdown,
                result = engine.heartbeat(self.transport.as_ref()) => result,
            };

            match result {
                Ok(outcome) => {
                    if let Some(requested) = outcome.interval {
                        interval = requested;
                    }
                    wait = interval;
                    if let Some(assignment) = outcome.assignment {
                        self.accept_assignment(assignment);
                        return SessionEnd::Reassigned(interval);
                    }
                }
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }

    fn accept_assignment(&self, assignment: Assignment) {
        self.tracker.store(Some(assignment.clone()));
        let epoch = self.generation.epoch();
        if !self.feed.publish(AssignmentUpdate { epoch, assignment }) {
            debug!(group = %self.config.group_id, "Assignment feed closed, update dropped");
        }
    }

    /// Bring the consumer in line with the tracked assignment: revocations
    /// first, then acquisitions. Returns true if anything changed.
    async fn reconcile(&self, applied: &mut Assignment) -> bool {
        let target = self.tracker.snapshot_clone();
        let delta = target.diff_against(applied);
        if delta.is_empty() {
            return false;
        }

        self.set_state(MemberState::Reconciling);
        info!(
            group = %self.config.group_id,
            revoked = %delta.revoked,
            added = %delta.added,
            "Reconciling assignment"
        );
        for (topic, partitions) in delta.revoked.to_sorted_vecs() {
            self.consumer.revoke(&topic, &partitions).await;
        }
        for (topic, partitions) in delta.added.to_sorted_vecs() {
            self.consumer.acquire(&topic, &partitions).await;
        }
        metrics::set_assigned_partitions(&self.config.group_id, target.partition_count());
        *applied = target;
        true
    }

    async fn revoke_all(&self, applied: &mut Assignment) {
        for (topic, partitions) in std::mem::take(applied).to_sorted_vecs() {
            self.consumer.revoke(&topic, &partitions).await;
        }
        metrics::set_assigned_partitions(&self.config.group_id, 0);
    }

    /// Abandon the session and wait out the backoff. Returns true if
    /// shutdown was requested while waiting.
    async fn fail_wait(
        &self,
        failure: GroupError,
        consecutive_failures: u32,
        applied: &mut Assignment,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        let backoff = retry::rejoin_backoff(consecutive_failures);
        warn!(
            group = %self.config.group_id,
            error = %failure,
            consecutive_failures,
            backoff_ms = backoff.as_millis() as u64,
            "Group session failed, abandoning partitions and rejoining"
        );
        metrics::record_rejoin(failure.kind());

        self.revoke_all(applied).await;
        self.tracker.clear();
        self.set_state(MemberState::Backoff);

        tokio::select! {
            biased;
            _ = shutdown.recv() => true,
            _ = tokio::time::sleep(backoff) => false,
        }
    }

    /// Best-effort departure. Skipped for members with a durable instance
    /// id, and for members that never joined.
    async fn leave(&self) {
        let group = &self.config.group_id;
        if let Some(instance_id) = &self.config.instance_id {
            info!(group = %group, instance_id = %instance_id, "Skipping leave for member with a durable instance id");
            return;
        }
        if self.protocol_support() != ProtocolSupport::Confirmed {
            return;
        }
        let member_id = self.generation.member_id();
        if member_id.is_empty() {
            return;
        }

        self.set_state(MemberState::Leaving);
        let request = HeartbeatRequest::leave(group.clone(), member_id.clone(), self.config.instance_id.clone());
        info!(
            group = %group,
            member_id = %member_id,
            member_epoch = %request.member_epoch,
            "Leaving group"
        );

        // Sent once. A lost leave is recorded, and the coordinator expires
        // the member after its session timeout.
        let deadline = Instant::now() + self.config.leave_timeout;
        let start = std::time::Instant::now();
        let sent = tokio::time::timeout(
            self.config.leave_timeout,
            self.transport.consumer_group_heartbeat(request, deadline),
        )
        .await;
        let elapsed = start.elapsed().as_secs_f64();

        let failure = match sent {
            Err(_) => Some(GroupError::Transport(TransportError::Timeout)),
            Ok(Err(e)) => Some(GroupError::Transport(e)),
            Ok(Ok(response)) => response.group_error(),
        };

        match &failure {
            Some(e) => {
                metrics::record_heartbeat("leave", e.kind(), elapsed);
                warn!(group = %group, error = %e, "Failed to leave group");
            }
            None => {
                metrics::record_heartbeat("leave", "success", elapsed);
                info!(group = %group, "Left group");
            }
        }
        *self.leave_error.lock() = failure;
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Record the first protocol-level answer other than `UnsupportedVersion`.
    fn confirm_support(&self) {
        if self.settle_support(ProtocolSupport::Confirmed) {
            info!(group = %self.config.group_id, "Coordinator supports consumer group heartbeats");
        }
    }

    /// Returns true if this call settled support.
    fn settle_support(&self, settled: ProtocolSupport) -> bool {
        self.support.send_if_modified(|current| {
            if *current == ProtocolSupport::Unknown {
                *current = settled;
                true
            } else {
                false
            }
        })
    }

    fn set_state(&self, next: MemberState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(group = %self.config.group_id, from = ?*state, to = ?next, "Member state change");
            *state = next;
        }
    }
}

/// Marks the member stopped and closes the feed if the management task
/// panics, so introspection does not report a live session.
struct UnwindGuard<'a>(&'a GroupManager);

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(group = %self.0.config.group_id, "Group management task panicked");
            self.0.set_state(MemberState::Stopped);
            self.0.feed.close();
        }
    }
}

impl std::fmt::Debug for GroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupManager")
            .field("group_id", &self.config.group_id)
            .field("state", &self.state())
            .field("protocol_support", &self.protocol_support())
            .field("generation", &self.generation.snapshot())
            .finish()
    }
}
