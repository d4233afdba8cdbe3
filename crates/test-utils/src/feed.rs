//! In-memory message feed.
//!
//! Behaves like the Redis feed from a processor's point of view: every
//! delivery bumps the message's delivery count, abandoned messages come back,
//! and settled messages are gone for good. Clones share state so a test can
//! keep a handle for inspection after moving the feed into a runtime.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use stac_common::{StacError, StacResult};
use storage::{Feed, FeedMessage};

#[derive(Debug, Default)]
struct FeedState {
    next_id: u64,
    ready: VecDeque<FeedMessage>,
    in_flight: HashMap<String, FeedMessage>,
    acked: Vec<String>,
    abandoned: Vec<String>,
    dead_letters: Vec<(FeedMessage, String)>,
    renewals: usize,
    /// Number of upcoming `receive` calls that fail
    receive_failures: usize,
    /// Number of upcoming `ack` calls that fail
    ack_failures: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    state: Arc<Mutex<FeedState>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a raw payload; returns its id.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> String {
        self.push_redelivered(payload, 0)
    }

    /// Queue a payload that has already been delivered `previous_deliveries`
    /// times; the next receive reports one more.
    pub fn push_redelivered(&self, payload: impl Into<Vec<u8>>, previous_deliveries: u32) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        state
            .ready
            .push_back(FeedMessage::new(&id, previous_deliveries, payload));
        id
    }

    /// Make the next `n` receive calls fail with a transport error.
    pub fn fail_receives(&self, n: usize) {
        self.state().receive_failures = n;
    }

    /// Make the next `n` ack calls fail. The message stays in flight.
    pub fn fail_acks(&self, n: usize) {
        self.state().ack_failures = n;
    }

    pub fn acked(&self) -> Vec<String> {
        self.state().acked.clone()
    }

    pub fn abandoned(&self) -> Vec<String> {
        self.state().abandoned.clone()
    }

    /// Dead-lettered messages with their reasons.
    pub fn dead_letters(&self) -> Vec<(FeedMessage, String)> {
        self.state().dead_letters.clone()
    }

    pub fn renewals(&self) -> usize {
        self.state().renewals
    }

    /// Messages waiting for delivery.
    pub fn pending(&self) -> usize {
        self.state().ready.len()
    }

    /// Messages delivered but not settled.
    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    fn take_in_flight(&self, message: &FeedMessage) -> StacResult<FeedMessage> {
        self.state()
            .in_flight
            .remove(&message.id)
            .ok_or_else(|| StacError::Transport(format!("message {} is not locked", message.id)))
    }
}

#[async_trait]
impl Feed for MemoryFeed {
    async fn receive(&mut self, max_wait: Duration) -> StacResult<Option<FeedMessage>> {
        let next = {
            let mut state = self.state();
            if state.receive_failures > 0 {
                state.receive_failures -= 1;
                return Err(StacError::Transport("feed unavailable".to_string()));
            }
            state.ready.pop_front().map(|mut message| {
                message.delivery_count += 1;
                state.in_flight.insert(message.id.clone(), message.clone());
                message
            })
        };

        if next.is_none() {
            tokio::time::sleep(max_wait.min(Duration::from_millis(5))).await;
        }
        Ok(next)
    }

    async fn ack(&mut self, message: &FeedMessage) -> StacResult<()> {
        {
            let mut state = self.state();
            if state.ack_failures > 0 {
                state.ack_failures -= 1;
                return Err(StacError::Transport("ack lost".to_string()));
            }
        }
        let message = self.take_in_flight(message)?;
        self.state().acked.push(message.id);
        Ok(())
    }

    async fn abandon(&mut self, message: &FeedMessage) -> StacResult<()> {
        let message = self.take_in_flight(message)?;
        let mut state = self.state();
        state.abandoned.push(message.id.clone());
        state.ready.push_back(message);
        Ok(())
    }

    async fn dead_letter(&mut self, message: &FeedMessage, reason: &str) -> StacResult<()> {
        let message = self.take_in_flight(message)?;
        self.state().dead_letters.push((message, reason.to_string()));
        Ok(())
    }

    async fn renew_lock(&mut self, message: &FeedMessage) -> StacResult<()> {
        let mut state = self.state();
        if !state.in_flight.contains_key(&message.id) {
            return Err(StacError::Transport(format!(
                "message {} is not locked",
                message.id
            )));
        }
        state.renewals += 1;
        Ok(())
    }

    async fn publish(&mut self, payload: &[u8]) -> StacResult<String> {
        Ok(self.push(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abandoned_message_is_redelivered_with_higher_count() {
        let mut feed = MemoryFeed::new();
        let id = feed.push(b"{}".to_vec());

        let first = feed.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.id, id);
        assert_eq!(first.delivery_count, 1);
        feed.abandon(&first).await.unwrap();

        let second = feed.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 2);
        feed.ack(&second).await.unwrap();

        assert!(feed.receive(Duration::ZERO).await.unwrap().is_none());
        assert_eq!(feed.acked(), vec![id.clone()]);
        assert_eq!(feed.abandoned(), vec![id]);
    }

    #[tokio::test]
    async fn test_double_settlement_is_an_error() {
        let mut feed = MemoryFeed::new();
        feed.push(b"{}".to_vec());
        let message = feed.receive(Duration::ZERO).await.unwrap().unwrap();
        feed.ack(&message).await.unwrap();
        assert!(feed.ack(&message).await.is_err());
        assert!(feed.dead_letter(&message, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_redelivered_message_keeps_counting() {
        let mut feed = MemoryFeed::new();
        feed.push_redelivered(b"{}".to_vec(), 1);
        let message = feed.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(message.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_failed_ack_leaves_message_in_flight() {
        let mut feed = MemoryFeed::new();
        feed.push(b"{}".to_vec());
        feed.fail_acks(1);
        let message = feed.receive(Duration::ZERO).await.unwrap().unwrap();
        assert!(feed.ack(&message).await.is_err());
        assert_eq!(feed.in_flight(), 1);
        feed.ack(&message).await.unwrap();
        assert_eq!(feed.acked(), vec![message.id]);
    }

    #[tokio::test]
    async fn test_receive_failures() {
        let mut feed = MemoryFeed::new();
        feed.fail_receives(1);
        assert!(feed.receive(Duration::ZERO).await.is_err());
        assert!(feed.receive(Duration::ZERO).await.unwrap().is_none());
    }
}
