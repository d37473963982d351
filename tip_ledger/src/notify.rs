//! Seams to the chat layer: announcing group tips and post-commit notifications.
//!
//! The [`Announcer`] result matters: a failed group tip announcement triggers a
//! compensating refund. [`SettlementListener`] callbacks run after commit and
//! are best-effort; their errors are logged and never touch settled state.

use crate::game::Match;
use crate::group_tip::{GroupTip, GroupTipOutcome};
use crate::token::Token;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Opaque reference to a posted chat message
pub type MessageRef = String;

/// Notification errors
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The chat platform rejected or dropped the message
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Database error in a listener
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Posts new group tips where users can claim them
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce_group_tip(
        &self,
        group_tip: &GroupTip,
        token: &Token,
    ) -> Result<MessageRef, NotifyError>;
}

/// Receives settled results after their transaction committed
#[async_trait]
pub trait SettlementListener: Send + Sync {
    /// A match was settled (win, loss or tie)
    async fn match_settled(&self, _settled: &Match) -> Result<(), NotifyError> {
        Ok(())
    }

    /// A match was canceled or expired and the wager refunded
    async fn match_closed(&self, _closed: &Match) -> Result<(), NotifyError> {
        Ok(())
    }

    /// A group tip was finalized or refunded
    async fn group_tip_resolved(&self, _outcome: &GroupTipOutcome) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Announcer that posts nowhere and always succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnnouncer;

#[async_trait]
impl Announcer for NoopAnnouncer {
    async fn announce_group_tip(
        &self,
        group_tip: &GroupTip,
        _token: &Token,
    ) -> Result<MessageRef, NotifyError> {
        Ok(format!("group_tip:{}", group_tip.id))
    }
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

#[async_trait]
impl SettlementListener for NoopListener {}

/// Fans every event out to several listeners
///
/// All listeners are called even if one fails; the first error is returned.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn SettlementListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn SettlementListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

fn first_error(results: Vec<Result<(), NotifyError>>) -> Result<(), NotifyError> {
    results.into_iter().collect()
}

#[async_trait]
impl SettlementListener for ListenerSet {
    async fn match_settled(&self, settled: &Match) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            results.push(listener.match_settled(settled).await);
        }
        first_error(results)
    }

    async fn match_closed(&self, closed: &Match) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            results.push(listener.match_closed(closed).await);
        }
        first_error(results)
    }

    async fn group_tip_resolved(&self, outcome: &GroupTipOutcome) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            results.push(listener.group_tip_resolved(outcome).await);
        }
        first_error(results)
    }
}

/// Run a post-commit side effect in the background, logging failure
pub(crate) fn spawn_post_commit<F>(what: String, effect: F)
where
    F: Future<Output = Result<(), NotifyError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = effect.await {
            log::warn!("Post-commit {what} failed: {e}");
        }
    });
}
