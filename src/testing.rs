//! In-memory collaborators for testing group membership.
//!
//! - [`ScriptedTransport`]: replays scripted coordinator responses and
//!   records every request
//! - [`StaticTopicDirectory`]: a topic id/name map that records refresh requests
//! - [`RecordingConsumer`]: records revoke/acquire calls in order
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! groupbeat = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::group::{Assignment, GroupTransport, PartitionConsumer, TopicDirectory};
use crate::messages::{HeartbeatRequest, HeartbeatResponse};
use crate::types::{MemberEpoch, TopicId};

enum Scripted {
    Respond(HeartbeatResponse),
    Fail(TransportError),
    /// Never answer; the request fails with a timeout at its deadline.
    Stall,
}

/// A [`GroupTransport`] that answers from a script.
///
/// Once the script runs out, every heartbeat gets an "idle" answer: success,
/// the request's epoch (at least 1), no assignment change, and a
/// coordinator-assigned member id if the request had none. Leave requests
/// are echoed back with their own epoch.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HeartbeatRequest>>,
    sent: watch::Sender<usize>,
    idle_interval_ms: AtomicI32,
    assigned_ids: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let (sent, _) = watch::channel(0);
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            sent,
            idle_interval_ms: AtomicI32::new(1_000),
            assigned_ids: AtomicUsize::new(0),
        }
    }

    /// Heartbeat interval returned by idle answers.
    pub fn set_idle_interval_ms(&self, interval_ms: i32) {
        self.idle_interval_ms.store(interval_ms, Ordering::SeqCst);
    }

    pub fn push_response(&self, response: HeartbeatResponse) {
        self.script.lock().push_back(Scripted::Respond(response));
    }

    pub fn push_error_code(&self, error_code: i16) {
        self.push_response(HeartbeatResponse::error(error_code, None));
    }

    pub fn push_transport_error(&self, error: TransportError) {
        self.script.lock().push_back(Scripted::Fail(error));
    }

    pub fn push_stall(&self) {
        self.script.lock().push_back(Scripted::Stall);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<HeartbeatRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Wait until at least `count` requests have been received.
    pub async fn wait_for_requests(&self, count: usize) {
        let mut rx = self.sent.subscribe();
        let _ = rx.wait_for(|sent| *sent >= count).await;
    }

    fn idle_response(&self, request: &HeartbeatRequest) -> HeartbeatResponse {
        if request.is_leave() {
            return HeartbeatResponse::ok(request.member_epoch, 0);
        }
        let epoch = MemberEpoch::new(request.member_epoch.value().max(1));
        let response = HeartbeatResponse::ok(epoch, self.idle_interval_ms.load(Ordering::SeqCst));
        if request.member_id.is_empty() {
            let n = self.assigned_ids.fetch_add(1, Ordering::SeqCst) + 1;
            response.with_member_id(format!("server-member-{n}"))
        } else {
            response
        }
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupTransport for ScriptedTransport {
    async fn consumer_group_heartbeat(
        &self,
        request: HeartbeatRequest,
        deadline: Instant,
    ) -> Result<HeartbeatResponse, TransportError> {
        let next = self.script.lock().pop_front();
        let idle = self.idle_response(&request);
        let count = {
            let mut requests = self.requests.lock();
            requests.push(request);
            requests.len()
        };
        self.sent.send_replace(count);

        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Stall) => {
                tokio::time::sleep_until(deadline).await;
                Err(TransportError::Timeout)
            }
            None => Ok(idle),
        }
    }
}

/// A [`TopicDirectory`] backed by a plain map.
#[derive(Debug, Default)]
pub struct StaticTopicDirectory {
    topics: RwLock<HashMap<TopicId, String>>,
    refreshes: Mutex<Vec<String>>,
}

impl StaticTopicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TopicId, name: impl Into<String>) {
        self.topics.write().insert(id, name.into());
    }

    pub fn remove(&self, id: TopicId) {
        self.topics.write().remove(&id);
    }

    /// Reasons given for every refresh request, in order.
    pub fn refresh_requests(&self) -> Vec<String> {
        self.refreshes.lock().clone()
    }
}

impl TopicDirectory for StaticTopicDirectory {
    fn resolve_topic_id(&self, id: TopicId) -> Option<String> {
        self.topics.read().get(&id).cloned()
    }

    fn topic_id(&self, name: &str) -> Option<TopicId> {
        self.topics
            .read()
            .iter()
            .find(|(_, topic)| topic.as_str() == name)
            .map(|(id, _)| *id)
    }

    fn trigger_metadata_refresh(&self, reason: &str) {
        self.refreshes.lock().push(reason.to_string());
    }
}

/// A call made on a [`RecordingConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Revoke(String, Vec<i32>),
    Acquire(String, Vec<i32>),
}

/// A [`PartitionConsumer`] that only records what it was told.
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    events: Mutex<Vec<ConsumerEvent>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().clone()
    }

    /// Partitions currently owned, replaying every event in order.
    pub fn owned(&self) -> Assignment {
        let mut owned: HashMap<String, Vec<i32>> = HashMap::new();
        for event in self.events.lock().iter() {
            match event {
                ConsumerEvent::Acquire(topic, partitions) => {
                    owned.entry(topic.clone()).or_default().extend(partitions);
                }
                ConsumerEvent::Revoke(topic, partitions) => {
                    if let Some(current) = owned.get_mut(topic) {
                        current.retain(|p| !partitions.contains(p));
                        if current.is_empty() {
                            owned.remove(topic);
                        }
                    }
                }
            }
        }
        owned.into_iter().collect()
    }
}

#[async_trait]
impl PartitionConsumer for RecordingConsumer {
    async fn revoke(&self, topic: &str, partitions: &[i32]) {
        self.events
            .lock()
            .push(ConsumerEvent::Revoke(topic.to_string(), partitions.to_vec()));
    }

    async fn acquire(&self, topic: &str, partitions: &[i32]) {
        self.events
            .lock()
            .push(ConsumerEvent::Acquire(topic.to_string(), partitions.to_vec()));
    }
}
