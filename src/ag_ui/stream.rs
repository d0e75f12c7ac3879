use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::domain::delta::InboundDelta;

use super::translate::{DeltaTranslator, TranslateOutput};
use super::types::AgUiEvent;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("stream ended before the run finished")]
    Interrupted,
    #[error("agent run failed: {0}")]
    RunFailed(String),
    #[error("transport failure: {0}")]
    Io(String),
    #[error("upstream send failed: {0}")]
    Upstream(String),
}

// ---------------------------------------------------------------------------
// translate_stream — AG-UI events in, inbound deltas out
// ---------------------------------------------------------------------------

/// Translate a stream of AG-UI events into inbound deltas.
///
/// The output ends after `RUN_FINISHED`. A `RUN_ERROR`, a transport error, or
/// a source that ends without `RUN_FINISHED` yields one final `Err`.
pub fn translate_stream<S>(
    session_name: impl Into<String>,
    events: S,
) -> impl Stream<Item = Result<InboundDelta, TransportError>> + Send
where
    S: Stream<Item = Result<AgUiEvent, TransportError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(256);
    let mut translator = DeltaTranslator::new(session_name);

    tokio::spawn(async move {
        tokio::pin!(events);
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            let (deltas, end) = match translator.translate(&event) {
                TranslateOutput::Deltas(d) => (d, None),
                TranslateOutput::Terminal(d) => (d, Some(Ok(()))),
                TranslateOutput::Failed(d, message) => {
                    (d, Some(Err(TransportError::RunFailed(message))))
                }
            };
            for delta in deltas {
                if tx.send(Ok(delta)).await.is_err() {
                    return; // receiver dropped
                }
            }
            match end {
                None => {}
                Some(Ok(())) => return,
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        let _ = tx.send(Err(TransportError::Interrupted)).await;
    });

    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collect(
        events: Vec<Result<AgUiEvent, TransportError>>,
    ) -> Vec<Result<InboundDelta, TransportError>> {
        translate_stream("post_generation_agent", tokio_stream::iter(events))
            .collect()
            .await
    }

    fn run_started() -> AgUiEvent {
        AgUiEvent::RunStarted {
            thread_id: "s1".into(),
            run_id: "r1".into(),
        }
    }

    #[tokio::test]
    async fn finished_run_ends_cleanly() {
        let out = collect(vec![
            Ok(run_started()),
            Ok(AgUiEvent::StateSnapshot {
                snapshot: json!({"tool_logs": []}),
            }),
            Ok(AgUiEvent::RunFinished {
                thread_id: "s1".into(),
                run_id: "r1".into(),
            }),
        ])
        .await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Ok(InboundDelta::StatePatch { .. })));
    }

    #[tokio::test]
    async fn source_ending_early_reports_interruption() {
        let out = collect(vec![
            Ok(run_started()),
            Ok(AgUiEvent::ToolCallStart {
                tool_call_id: "c1".into(),
                tool_call_name: "generate_post".into(),
                parent_message_id: None,
            }),
            Ok(AgUiEvent::ToolCallArgs {
                tool_call_id: "c1".into(),
                delta: r#"{"tweet":{"title":"Hi"#.into(),
            }),
        ])
        .await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Ok(InboundDelta::ActionCall(_))));
        assert_eq!(out[1], Err(TransportError::Interrupted));
    }

    #[tokio::test]
    async fn run_error_and_transport_error_terminate() {
        let out = collect(vec![
            Ok(run_started()),
            Ok(AgUiEvent::RunError {
                message: "boom".into(),
                code: None,
            }),
            Ok(run_started()),
        ])
        .await;
        assert_eq!(out, vec![Err(TransportError::RunFailed("boom".into()))]);

        let out = collect(vec![Err(TransportError::Io("reset".into()))]).await;
        assert_eq!(out, vec![Err(TransportError::Io("reset".into()))]);
    }
}
