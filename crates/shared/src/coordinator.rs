use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::tools::{ToolContext, ToolError, ToolOutput, ToolRegistry};

/// What happens to a tool that is still running when its deadline passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Stop waiting but let the tool run to completion in the background.
    #[default]
    Detach,
    /// Stop waiting and cancel the tool's context.
    Cancel,
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "detach" => Ok(Self::Detach),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("unknown timeout policy {other}")),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Pending,
    Success(ToolOutput),
    Error(ToolError),
}

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub deadline_ms: u64,
    pub outcome: ToolOutcome,
}

impl ToolInvocation {
    fn pending(call: &ToolCall, deadline_ms: u64) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            deadline_ms,
            outcome: ToolOutcome::Pending,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }
}

/// Runs requested tool calls one at a time, each raced against a deadline.
///
/// A call that fails or times out only affects its own outcome.
#[derive(Clone)]
pub struct ToolCoordinator {
    registry: Arc<ToolRegistry>,
    deadline: Duration,
    policy: TimeoutPolicy,
}

impl ToolCoordinator {
    pub fn new(registry: Arc<ToolRegistry>, deadline: Duration, policy: TimeoutPolicy) -> Self {
        Self {
            registry,
            deadline,
            policy,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolInvocation> {
        let mut invocations = Vec::with_capacity(calls.len());
        for call in calls {
            invocations.push(self.execute(call).await);
        }
        invocations
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolInvocation {
        let deadline_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX);
        let mut invocation = ToolInvocation::pending(call, deadline_ms);

        let tool = match self.registry.prepare(&call.name, &call.arguments) {
            Ok(tool) => tool,
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool call rejected");
                invocation.outcome = ToolOutcome::Error(err);
                return invocation;
            }
        };

        let cancellation = CancellationToken::new();
        let ctx = ToolContext::new(cancellation.clone());
        let arguments = call.arguments.clone();
        let started = Instant::now();
        // The spawned task owns the execution; dropping the handle on timeout
        // detaches it instead of aborting it.
        let handle = tokio::spawn(async move { tool.execute(arguments, ctx).await });

        invocation.outcome = match tokio::time::timeout(self.deadline, handle).await {
            Ok(Ok(Ok(output))) => {
                info!(
                    tool = %call.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool call completed"
                );
                ToolOutcome::Success(output)
            }
            Ok(Ok(Err(err))) => {
                warn!(tool = %call.name, error = %err, "tool call failed");
                ToolOutcome::Error(err)
            }
            Ok(Err(join_err)) => {
                warn!(tool = %call.name, error = %join_err, "tool task aborted");
                ToolOutcome::Error(ToolError::execution(
                    &call.name,
                    &call.arguments,
                    "Tool execution failed unexpectedly",
                ))
            }
            Err(_) => {
                if self.policy == TimeoutPolicy::Cancel {
                    cancellation.cancel();
                }
                warn!(
                    tool = %call.name,
                    deadline_ms,
                    policy = ?self.policy,
                    "tool call exceeded its deadline"
                );
                ToolOutcome::Error(ToolError::Timeout { deadline_ms })
            }
        };

        invocation
    }
}
