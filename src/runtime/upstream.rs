use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ag_ui::{RunAgentInput, TransportError};

/// Delivers run requests to the remote agent. Retries, if any, are the
/// implementation's business.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    async fn send(&self, input: RunAgentInput) -> Result<(), TransportError>;
}

/// Drops every request. Used when no remote endpoint is configured.
pub struct NullUpstream;

#[async_trait]
impl Upstream for NullUpstream {
    async fn send(&self, input: RunAgentInput) -> Result<(), TransportError> {
        tracing::debug!(thread = %input.thread_id, "no upstream configured, dropping run");
        Ok(())
    }
}

/// Hands requests to an in-process receiver, e.g. a transport task.
pub struct ChannelUpstream {
    tx: mpsc::UnboundedSender<RunAgentInput>,
}

impl ChannelUpstream {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunAgentInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Upstream for ChannelUpstream {
    async fn send(&self, input: RunAgentInput) -> Result<(), TransportError> {
        self.tx
            .send(input)
            .map_err(|_| TransportError::Upstream("receiver closed".into()))
    }
}
