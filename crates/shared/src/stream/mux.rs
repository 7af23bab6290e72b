use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::render::render_output;
use super::{
    FRAME_SEPARATOR, PROCESSING_MARKER, STREAM_ERROR_MARKER, TOOL_ERROR_MARKER,
    tool_result_marker,
};
use crate::coordinator::{ToolCall, ToolCoordinator, ToolInvocation, ToolOutcome};
use crate::llm::{LlmGatewayError, ModelEvent, ModelEventStream};

/// Notified as a response moves through its phases.
pub trait PhaseObserver: Send + Sync {
    fn streaming(&self) {}
    fn processing_tools(&self, _calls: &[ToolCall]) {}
    fn tool_finished(&self, _invocation: &ToolInvocation) {}
}

pub struct NoopObserver;

impl PhaseObserver for NoopObserver {}

#[derive(Debug, Default)]
pub struct MuxReport {
    /// Generated text, without any tool frames.
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub stream_error: Option<LlmGatewayError>,
    /// Set once a write to the client failed. Tools still run to completion.
    pub client_disconnected: bool,
}

impl MuxReport {
    pub fn last_tool_error(&self) -> Option<String> {
        self.invocations
            .iter()
            .rev()
            .find_map(|invocation| match &invocation.outcome {
                ToolOutcome::Error(err) => Some(err.to_string()),
                _ => None,
            })
    }
}

/// Writes model text and tool result frames onto one outbound text stream.
///
/// Text deltas are forwarded as they arrive. Tool calls are collected until
/// the model stream ends, then run sequentially and written one frame each,
/// in request order.
#[derive(Clone)]
pub struct StreamMultiplexer {
    coordinator: ToolCoordinator,
}

impl StreamMultiplexer {
    pub fn new(coordinator: ToolCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &ToolCoordinator {
        &self.coordinator
    }

    pub async fn run(
        &self,
        mut events: ModelEventStream,
        out: &mpsc::Sender<String>,
        observer: &dyn PhaseObserver,
    ) -> MuxReport {
        let mut report = MuxReport::default();
        let mut calls = Vec::new();
        observer.streaming();

        while let Some(event) = events.next().await {
            match event {
                Ok(ModelEvent::TextDelta(text)) => {
                    report.text.push_str(&text);
                    emit(out, text, &mut report).await;
                }
                Ok(ModelEvent::ToolCall(call)) => {
                    debug!(tool = %call.name, call_id = %call.id, "model requested tool call");
                    calls.push(call);
                }
                Err(err) => {
                    warn!(error = %err, "model stream failed");
                    let frame = format!("{FRAME_SEPARATOR}{STREAM_ERROR_MARKER}{err}");
                    emit(out, frame, &mut report).await;
                    report.stream_error = Some(err);
                    return report;
                }
            }
        }

        if calls.is_empty() {
            return report;
        }

        observer.processing_tools(&calls);
        emit(
            out,
            format!("{FRAME_SEPARATOR}{PROCESSING_MARKER}"),
            &mut report,
        )
        .await;

        for call in &calls {
            let invocation = self.coordinator.execute(call).await;
            observer.tool_finished(&invocation);
            emit(out, result_frame(&invocation), &mut report).await;
            report.invocations.push(invocation);
        }

        report
    }
}

fn result_frame(invocation: &ToolInvocation) -> String {
    match &invocation.outcome {
        ToolOutcome::Success(output) => format!(
            "{FRAME_SEPARATOR}{}{}",
            tool_result_marker(&invocation.name),
            render_output(output)
        ),
        ToolOutcome::Error(err) => format!("{FRAME_SEPARATOR}{TOOL_ERROR_MARKER}{err}"),
        ToolOutcome::Pending => {
            format!("{FRAME_SEPARATOR}{TOOL_ERROR_MARKER}Tool execution did not complete")
        }
    }
}

async fn emit(out: &mpsc::Sender<String>, chunk: String, report: &mut MuxReport) {
    if report.client_disconnected {
        return;
    }
    if out.send(chunk).await.is_err() {
        debug!("client went away; continuing without writes");
        report.client_disconnected = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures::stream;
    use serde_json::{Value, json};

    use super::*;
    use crate::coordinator::TimeoutPolicy;
    use crate::tools::{Tool, ToolContext, ToolFuture, ToolOutput, ToolRegistry};

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echoes its text argument."
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        fn execute<'a>(&'a self, arguments: Value, _ctx: ToolContext) -> ToolFuture<'a> {
            Box::pin(async move {
                let text = arguments["text"].as_str().unwrap_or_default().to_string();
                Ok(ToolOutput::Message(text))
            })
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        phases: Mutex<Vec<String>>,
    }

    impl PhaseObserver for RecordingObserver {
        fn streaming(&self) {
            self.phases.lock().expect("lock").push("streaming".to_string());
        }

        fn processing_tools(&self, calls: &[ToolCall]) {
            self.phases
                .lock()
                .expect("lock")
                .push(format!("processing {}", calls.len()));
        }

        fn tool_finished(&self, invocation: &ToolInvocation) {
            self.phases
                .lock()
                .expect("lock")
                .push(format!("finished {}", invocation.name));
        }
    }

    fn multiplexer() -> StreamMultiplexer {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).expect("register echo");
        StreamMultiplexer::new(ToolCoordinator::new(
            Arc::new(registry),
            Duration::from_secs(5),
            TimeoutPolicy::Detach,
        ))
    }

    fn events(items: Vec<Result<ModelEvent, LlmGatewayError>>) -> ModelEventStream {
        Box::pin(stream::iter(items))
    }

    fn call(id: &str, name: &str, arguments: Value) -> ModelEvent {
        ModelEvent::ToolCall(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        })
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> String {
        let mut body = String::new();
        while let Some(chunk) = rx.recv().await {
            body.push_str(&chunk);
        }
        body
    }

    #[tokio::test]
    async fn text_only_responses_have_no_frames() {
        let (tx, rx) = mpsc::channel(16);
        let report = multiplexer()
            .run(
                events(vec![
                    Ok(ModelEvent::TextDelta("Hel".to_string())),
                    Ok(ModelEvent::TextDelta("lo".to_string())),
                ]),
                &tx,
                &NoopObserver,
            )
            .await;
        drop(tx);

        assert_eq!(collect(rx).await, "Hello");
        assert_eq!(report.text, "Hello");
        assert!(report.invocations.is_empty());
    }

    #[tokio::test]
    async fn tool_frames_follow_text_in_request_order() {
        let (tx, rx) = mpsc::channel(16);
        let observer = RecordingObserver::default();
        let report = multiplexer()
            .run(
                events(vec![
                    Ok(ModelEvent::TextDelta("Checking".to_string())),
                    Ok(call("a", "echo", json!({ "text": "first" }))),
                    Ok(call("b", "missing", json!({}))),
                    Ok(call("c", "echo", json!({ "text": "third" }))),
                ]),
                &tx,
                &observer,
            )
            .await;
        drop(tx);

        assert_eq!(
            collect(rx).await,
            "Checking\n\n[Processing tools...]\n\n[Tool echo Result]: first\n\n[Tool Error]: Unknown tool: missing\n\n[Tool echo Result]: third"
        );
        assert_eq!(report.invocations.len(), 3);
        assert_eq!(
            report.last_tool_error().as_deref(),
            Some("Unknown tool: missing")
        );
        assert_eq!(
            *observer.phases.lock().expect("lock"),
            vec![
                "streaming",
                "processing 3",
                "finished echo",
                "finished missing",
                "finished echo"
            ]
        );
    }

    #[tokio::test]
    async fn stream_failure_writes_error_frame_and_skips_tools() {
        let (tx, rx) = mpsc::channel(16);
        let report = multiplexer()
            .run(
                events(vec![
                    Ok(ModelEvent::TextDelta("Partial".to_string())),
                    Ok(call("a", "echo", json!({ "text": "never" }))),
                    Err(LlmGatewayError::ProviderFailure("connection reset".to_string())),
                ]),
                &tx,
                &NoopObserver,
            )
            .await;
        drop(tx);

        let body = collect(rx).await;
        assert!(body.starts_with("Partial\n\n[Stream Error]: "));
        assert!(body.contains("connection reset"));
        assert!(!body.contains("[Processing tools...]"));
        assert!(report.stream_error.is_some());
        assert!(report.invocations.is_empty());
    }

    #[tokio::test]
    async fn tools_still_run_after_client_disconnects() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let report = multiplexer()
            .run(
                events(vec![Ok(call("a", "echo", json!({ "text": "x" })))]),
                &tx,
                &NoopObserver,
            )
            .await;

        assert!(report.client_disconnected);
        assert_eq!(report.invocations.len(), 1);
        assert!(report.invocations[0].is_success());
    }
}
