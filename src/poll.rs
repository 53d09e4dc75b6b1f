//! Caller-side waiting for a submitted item.
//!
//! The dispatcher never blocks a caller. Collaborators that want to hand
//! back a finished result in the same request poll [`Dispatcher::status`]
//! on their own task with a bounded number of attempts.

use crate::dispatch::Dispatcher;
use crate::model::{StatusSnapshot, WorkId};
use std::time::Duration;
use tracing::debug;

/// How long and how often to poll.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
    /// Give up immediately if the item is queued further back than this.
    pub defer_beyond_position: Option<usize>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
            defer_beyond_position: Some(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Reached `complete` or `error`.
    Finished(StatusSnapshot),
    /// Too far back in its lane to be worth waiting for.
    Deferred { position: usize },
    /// Attempts exhausted before a terminal state.
    TimedOut(StatusSnapshot),
    /// Unknown id, or purged before we looked.
    NotFound,
}

/// Poll `id` until it is terminal or `policy` runs out.
pub async fn await_result(
    dispatcher: &Dispatcher,
    id: WorkId,
    policy: &PollPolicy,
) -> PollOutcome {
    let Some(first) = dispatcher.status(id) else {
        return PollOutcome::NotFound;
    };
    // `position` is only set while queued.
    if let (Some(position), Some(limit)) = (first.position, policy.defer_beyond_position)
        && position > limit
    {
        debug!(%id, position, limit, "deferring poll");
        return PollOutcome::Deferred { position };
    }

    let mut last = first;
    for _ in 0..policy.attempts {
        if last.is_terminal() {
            return PollOutcome::Finished(last);
        }
        tokio::time::sleep(policy.interval).await;
        match dispatcher.status(id) {
            Some(snapshot) => last = snapshot,
            None => return PollOutcome::NotFound,
        }
    }

    if last.is_terminal() {
        PollOutcome::Finished(last)
    } else {
        PollOutcome::TimedOut(last)
    }
}
