//! Heartbeat request construction and response handling.
//!
//! [`HeartbeatEngine`] is the protocol half of group membership. It knows
//! how to build the next ConsumerGroupHeartbeat request and how to fold a
//! response into the shared member generation, but not when to send.
//! Scheduling lives in [`GroupManager`](super::GroupManager).
//!
//! # Differential requests
//!
//! After joining, a field is only sent when it changed since the last request
//! that carried it:
//!
//! | Field | Join (epoch 0) | Steady state |
//! |-------|----------------|--------------|
//! | instance / rack / assignor / rebalance timeout | sent | omitted |
//! | subscribed topics | full list (possibly empty) | only if changed |
//! | owned partitions | explicit empty | only if changed |
//!
//! The "last sent" memory is reset by every join, so a rejoin always
//! re-announces everything.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use tracing::{debug, error, info, warn};

use super::assignment::{Assignment, AssignmentTracker};
use super::membership::MemberGeneration;
use super::subscription::Subscription;
use super::traits::{GroupTransport, TopicDirectory};
use crate::config::{GroupConfig, ServerAssignor};
use crate::constants::REBALANCE_TIMEOUT_UNCHANGED;
use crate::error::{GroupError, Result};
use crate::messages::{HeartbeatRequest, HeartbeatResponse, TopicPartitions};
use crate::metrics;
use crate::types::{MemberEpoch, TopicId};

/// What a successful heartbeat round trip produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Interval the coordinator asked for, if it sent one.
    pub interval: Option<Duration>,
    /// The new assignment, only if it differs from the tracked one.
    pub assignment: Option<Assignment>,
}

/// Builds heartbeat requests and interprets responses for one member.
pub struct HeartbeatEngine {
    group_id: String,
    instance_id: Option<String>,
    rack_id: Option<String>,
    rebalance_timeout_ms: i32,
    server_assignor: ServerAssignor,
    request_timeout: Duration,

    generation: Arc<MemberGeneration>,
    tracker: Arc<AssignmentTracker>,
    subscription: Arc<Subscription>,
    topics: Arc<dyn TopicDirectory>,

    last_subscribed: Option<Vec<String>>,
    last_topics: Option<Assignment>,
    /// Ids learned from assignments, so owned partitions can be reported
    /// even if metadata has not caught up.
    topic_ids: HashMap<String, TopicId>,
}

impl HeartbeatEngine {
    pub fn new(
        config: &GroupConfig,
        generation: Arc<MemberGeneration>,
        tracker: Arc<AssignmentTracker>,
        subscription: Arc<Subscription>,
        topics: Arc<dyn TopicDirectory>,
    ) -> Self {
        Self {
            group_id: config.group_id.clone(),
            instance_id: config.instance_id.clone(),
            rack_id: config.rack_id.clone(),
            rebalance_timeout_ms: config.rebalance_timeout_ms(),
            server_assignor: config.server_assignor,
            request_timeout: config.request_timeout,
            generation,
            tracker,
            subscription,
            topics,
            last_subscribed: None,
            last_topics: None,
            topic_ids: HashMap::new(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Build the next heartbeat request from the current generation.
    ///
    /// # Panics
    ///
    /// Panics if asked to build a join request while the tracker still holds
    /// partitions; rejoining must always start from a cleared assignment.
    pub fn build_request(&mut self) -> HeartbeatRequest {
        let (member_id, member_epoch) = self.generation.load();
        let subscribed = self.subscription.snapshot();

        let mut request = HeartbeatRequest {
            group_id: self.group_id.clone(),
            member_id,
            member_epoch,
            ..Default::default()
        };

        if member_epoch.is_joining() {
            if self.tracker.is_tracking_anything() {
                error!(
                    group = %self.group_id,
                    tracked = %self.tracker.snapshot_clone(),
                    "Invariant violated: joining while still tracking partitions"
                );
                panic!(
                    "joining group {} while still tracking partitions {}",
                    self.group_id,
                    self.tracker.snapshot_clone()
                );
            }
            request.instance_id = self.instance_id.clone();
            request.rack_id = self.rack_id.clone();
            request.rebalance_timeout_ms = self.rebalance_timeout_ms;
            request.server_assignor = Some(self.server_assignor.protocol_name().to_string());
            request.subscribed_topic_regex = self.subscription.pattern_source().map(str::to_string);
            request.subscribed_topic_names = Some(subscribed.clone());
            request.topic_partitions = Some(Vec::new());

            self.last_subscribed = Some(subscribed);
            self.last_topics = Some(Assignment::new());
            return request;
        }

        request.rebalance_timeout_ms = REBALANCE_TIMEOUT_UNCHANGED;

        if self.last_subscribed.as_ref() != Some(&subscribed) {
            request.subscribed_topic_names = Some(subscribed.clone());
            self.last_subscribed = Some(subscribed);
        }

        let owned = self.tracker.snapshot_clone();
        if self.last_topics.as_ref() != Some(&owned) {
            request.topic_partitions = Some(self.owned_partitions(&owned));
            self.last_topics = Some(owned);
        }

        request
    }

    fn owned_partitions(&self, owned: &Assignment) -> Vec<TopicPartitions> {
        owned
            .iter()
            .filter_map(|(topic, partitions)| {
                let id = self
                    .topic_ids
                    .get(topic)
                    .copied()
                    .or_else(|| self.topics.topic_id(topic));
                match id {
                    Some(id) => Some(TopicPartitions::new(id, partitions.iter().copied())),
                    None => {
                        warn!(
                            group = %self.group_id,
                            topic,
                            "Owned topic has no known id, omitting it from heartbeat"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Apply a successful response to the member generation.
    ///
    /// Returns the resolved assignment if the response carried one that
    /// differs from the tracked assignment. Topic ids unknown to metadata are
    /// skipped, and a metadata refresh is requested once per unknown id.
    pub fn handle_response(&mut self, response: &HeartbeatResponse) -> Option<Assignment> {
        match &response.member_id {
            Some(member_id) => self
                .generation
                .store(member_id.clone(), response.member_epoch),
            None => self.generation.store_epoch(response.member_epoch),
        }
        metrics::set_member_epoch(&self.group_id, response.member_epoch.value());

        let assignment = response.assignment.as_ref()?;

        let mut resolved = Assignment::new();
        let mut unresolved: HashSet<TopicId> = HashSet::new();
        for tps in &assignment.topic_partitions {
            match self.topics.resolve_topic_id(tps.topic_id) {
                Some(name) => {
                    self.topic_ids.insert(name.clone(), tps.topic_id);
                    resolved.insert(name, tps.partitions.iter().copied());
                }
                None => {
                    if unresolved.insert(tps.topic_id) {
                        warn!(
                            group = %self.group_id,
                            topic_id = %tps.topic_id,
                            "Assignment references a topic id missing from metadata, skipping it"
                        );
                        metrics::record_unresolved_topic_id();
                        self.topics.trigger_metadata_refresh(&format!(
                            "consumer group heartbeat returned unknown topic id {}",
                            tps.topic_id
                        ));
                    }
                }
            }
        }

        if self.tracker.differs(&resolved) {
            Some(resolved)
        } else {
            debug!(group = %self.group_id, "Heartbeat assignment unchanged");
            None
        }
    }

    /// Build, send and interpret one heartbeat.
    ///
    /// A response carrying an error code is returned as the classified
    /// [`GroupError`]; nothing in the generation changes in that case.
    pub async fn heartbeat(&mut self, transport: &dyn GroupTransport) -> Result<HeartbeatOutcome> {
        let request = self.build_request();
        let kind = if request.is_join() { "join" } else { "heartbeat" };
        debug!(
            group = %self.group_id,
            member_id = %request.member_id,
            member_epoch = %request.member_epoch,
            "Sending heartbeat"
        );

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let start = StdInstant::now();
        let response = transport.consumer_group_heartbeat(request, deadline).await;
        let elapsed = start.elapsed().as_secs_f64();

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                metrics::record_heartbeat(kind, "transport_error", elapsed);
                return Err(GroupError::Transport(e));
            }
        };

        if let Some(err) = response.group_error() {
            metrics::record_heartbeat(kind, err.kind(), elapsed);
            return Err(err);
        }

        let assignment = self.handle_response(&response);
        let status = if assignment.is_some() {
            metrics::record_assignment_change();
            "assignment_changed"
        } else {
            "success"
        };
        metrics::record_heartbeat(kind, status, elapsed);

        if let Some(assignment) = &assignment {
            info!(
                group = %self.group_id,
                member_epoch = %response.member_epoch,
                assignment = %assignment,
                "Heartbeat received a new assignment"
            );
        }

        Ok(HeartbeatOutcome {
            interval: response.heartbeat_interval(),
            assignment,
        })
    }

    /// Epoch of the member generation this engine builds requests from.
    pub fn member_epoch(&self) -> MemberEpoch {
        self.generation.epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticTopicDirectory;

    struct Fixture {
        generation: Arc<MemberGeneration>,
        tracker: Arc<AssignmentTracker>,
        subscription: Arc<Subscription>,
        topics: Arc<StaticTopicDirectory>,
        engine: HeartbeatEngine,
    }

    fn fixture(config: GroupConfig) -> Fixture {
        let generation = Arc::new(MemberGeneration::new());
        let tracker = Arc::new(AssignmentTracker::new());
        let subscription = Arc::new(Subscription::topics(["orders"]));
        let topics = Arc::new(StaticTopicDirectory::new());
        let engine = HeartbeatEngine::new(
            &config,
            Arc::clone(&generation),
            Arc::clone(&tracker),
            Arc::clone(&subscription),
            topics.clone(),
        );
        Fixture {
            generation,
            tracker,
            subscription,
            topics,
            engine,
        }
    }

    // ========================================================================
    // Join requests
    // ========================================================================

    #[test]
    fn test_join_request_carries_full_state() {
        let config = GroupConfig::new("g")
            .with_instance_id("i-1")
            .with_rack("r-1")
            .with_server_assignor(ServerAssignor::Range);
        let mut f = fixture(config);
        f.generation.store("m-1", MemberEpoch::JOIN);

        let req = f.engine.build_request();
        assert_eq!(req.group_id, "g");
        assert_eq!(req.member_id, "m-1");
        assert!(req.is_join());
        assert_eq!(req.instance_id.as_deref(), Some("i-1"));
        assert_eq!(req.rack_id.as_deref(), Some("r-1"));
        assert_eq!(req.rebalance_timeout_ms, 60_000);
        assert_eq!(req.server_assignor.as_deref(), Some("range"));
        assert_eq!(req.subscribed_topic_names, Some(vec!["orders".to_string()]));
        assert_eq!(req.subscribed_topic_regex, None);
        assert_eq!(req.topic_partitions, Some(vec![]));
    }

    #[test]
    fn test_join_with_empty_subscription_sends_explicit_empty() {
        let mut f = fixture(GroupConfig::new("g"));
        f.subscription.purge_topics(["orders"]).unwrap();
        let req = f.engine.build_request();
        assert_eq!(req.subscribed_topic_names, Some(vec![]));
    }

    #[test]
    fn test_join_with_pattern_subscription_sends_regex() {
        let generation = Arc::new(MemberGeneration::new());
        let tracker = Arc::new(AssignmentTracker::new());
        let subscription = Arc::new(Subscription::pattern("^orders-.*").unwrap());
        let mut engine = HeartbeatEngine::new(
            &GroupConfig::new("g"),
            generation,
            tracker,
            subscription,
            Arc::new(StaticTopicDirectory::new()),
        );
        let req = engine.build_request();
        assert_eq!(req.subscribed_topic_regex.as_deref(), Some("^orders-.*"));
    }

    #[test]
    #[should_panic(expected = "while still tracking partitions")]
    fn test_join_while_assigned_panics() {
        let mut f = fixture(GroupConfig::new("g"));
        f.tracker
            .store(Some(Assignment::from_iter([("orders", vec![0])])));
        f.engine.build_request();
    }

    #[test]
    fn test_join_with_tracked_empty_assignment_is_allowed() {
        let mut f = fixture(GroupConfig::new("g"));
        f.tracker.store(Some(Assignment::new()));
        assert!(f.engine.build_request().is_join());
    }

    // ========================================================================
    // Differential requests
    // ========================================================================

    #[test]
    fn test_steady_state_omits_unchanged_fields() {
        let mut f = fixture(GroupConfig::new("g").with_instance_id("i-1"));
        f.generation.store("m-1", MemberEpoch::JOIN);
        f.engine.build_request();

        f.generation.store_epoch(MemberEpoch::new(1));
        let req = f.engine.build_request();
        assert_eq!(req.member_epoch, MemberEpoch::new(1));
        assert_eq!(req.instance_id, None);
        assert_eq!(req.server_assignor, None);
        assert_eq!(req.rebalance_timeout_ms, -1);
        assert_eq!(req.subscribed_topic_names, None);
        assert_eq!(req.topic_partitions, None);
    }

    #[test]
    fn test_subscription_change_sent_once() {
        let mut f = fixture(GroupConfig::new("g"));
        f.engine.build_request();
        f.generation.store("m-1", MemberEpoch::new(1));

        f.subscription.add_topics(["payments"]).unwrap();
        let req = f.engine.build_request();
        assert_eq!(
            req.subscribed_topic_names,
            Some(vec!["orders".to_string(), "payments".to_string()])
        );
        assert_eq!(f.engine.build_request().subscribed_topic_names, None);
    }

    #[test]
    fn test_owned_partitions_sent_once_after_change() {
        let mut f = fixture(GroupConfig::new("g"));
        let orders = TopicId::random();
        f.topics.insert(orders, "orders");
        f.engine.build_request();
        f.generation.store("m-1", MemberEpoch::new(1));

        f.tracker
            .store(Some(Assignment::from_iter([("orders", vec![1, 0])])));
        let req = f.engine.build_request();
        assert_eq!(
            req.topic_partitions,
            Some(vec![TopicPartitions::new(orders, [0, 1])])
        );
        assert_eq!(f.engine.build_request().topic_partitions, None);

        f.tracker.store(Some(Assignment::new()));
        assert_eq!(f.engine.build_request().topic_partitions, Some(vec![]));
    }

    #[test]
    fn test_rejoin_resets_differential_memory() {
        let mut f = fixture(GroupConfig::new("g"));
        f.engine.build_request();
        f.generation.store("m-1", MemberEpoch::new(1));
        f.engine.build_request();

        f.generation.store("m-1", MemberEpoch::JOIN);
        let req = f.engine.build_request();
        assert!(req.subscribed_topic_names.is_some());
        assert_eq!(req.topic_partitions, Some(vec![]));
    }

    // ========================================================================
    // Responses
    // ========================================================================

    #[test]
    fn test_response_updates_generation() {
        let mut f = fixture(GroupConfig::new("g"));
        f.generation.store("client-id", MemberEpoch::JOIN);

        let resp = HeartbeatResponse::ok(MemberEpoch::new(3), 1000);
        assert_eq!(f.engine.handle_response(&resp), None);
        assert_eq!(
            f.generation.load(),
            ("client-id".to_string(), MemberEpoch::new(3))
        );

        let resp = HeartbeatResponse::ok(MemberEpoch::new(4), 1000).with_member_id("server-id");
        f.engine.handle_response(&resp);
        assert_eq!(
            f.generation.load(),
            ("server-id".to_string(), MemberEpoch::new(4))
        );
    }

    #[test]
    fn test_response_resolves_and_detects_change() {
        let mut f = fixture(GroupConfig::new("g"));
        let orders = TopicId::random();
        f.topics.insert(orders, "orders");

        let resp = HeartbeatResponse::ok(MemberEpoch::new(1), 1000)
            .with_assignment(vec![TopicPartitions::new(orders, [2, 0, 1])]);
        let assignment = f.engine.handle_response(&resp).unwrap();
        assert_eq!(assignment, Assignment::from_iter([("orders", vec![0, 1, 2])]));

        f.tracker.store(Some(assignment));
        let resp = HeartbeatResponse::ok(MemberEpoch::new(2), 1000)
            .with_assignment(vec![TopicPartitions::new(orders, [1, 2, 0])]);
        assert_eq!(f.engine.handle_response(&resp), None);
    }

    #[test]
    fn test_unknown_topic_id_skipped_and_refresh_requested_once() {
        let mut f = fixture(GroupConfig::new("g"));
        let known = TopicId::random();
        let unknown = TopicId::random();
        f.topics.insert(known, "orders");

        let resp = HeartbeatResponse::ok(MemberEpoch::new(1), 1000).with_assignment(vec![
            TopicPartitions::new(unknown, [0]),
            TopicPartitions::new(known, [0]),
            TopicPartitions::new(unknown, [1]),
        ]);
        let assignment = f.engine.handle_response(&resp).unwrap();
        assert_eq!(assignment, Assignment::from_iter([("orders", vec![0])]));
        assert_eq!(f.topics.refresh_requests().len(), 1);
        assert!(f.topics.refresh_requests()[0].contains(&unknown.to_string()));
    }

    #[test]
    fn test_empty_assignment_against_untracked_is_unchanged() {
        let mut f = fixture(GroupConfig::new("g"));
        let resp = HeartbeatResponse::ok(MemberEpoch::new(1), 1000).with_assignment(vec![]);
        assert_eq!(f.engine.handle_response(&resp), None);
    }

    #[test]
    fn test_learned_topic_id_used_for_owned_partitions() {
        let mut f = fixture(GroupConfig::new("g"));
        let orders = TopicId::random();
        f.topics.insert(orders, "orders");
        f.engine.build_request();

        let resp = HeartbeatResponse::ok(MemberEpoch::new(1), 1000)
            .with_assignment(vec![TopicPartitions::new(orders, [0])]);
        let assignment = f.engine.handle_response(&resp).unwrap();
        f.topics.remove(orders);
        f.tracker.store(Some(assignment));

        let req = f.engine.build_request();
        assert_eq!(req.topic_partitions, Some(vec![TopicPartitions::new(orders, [0])]));
    }
}
