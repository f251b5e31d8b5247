//! Hooks invoked when a decision reaches a terminal state.
//!
//! Handlers carry application behaviour (serve the request, send the email, log the abuse)
//! and run after the counter has been committed. They are not invoked for failed decisions.

use crate::record::CounterRecord;
use async_trait::async_trait;

/// Application callbacks for allowed and denied actions.
#[async_trait]
pub trait OutcomeHandler: Send + Sync {
    async fn on_allow(&self, _identifier: &str, _record: &CounterRecord) {}

    async fn on_deny(&self, _identifier: &str, _record: &CounterRecord) {}
}

/// Does nothing. The default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl OutcomeHandler for NoopHandler {}
