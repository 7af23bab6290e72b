use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::coordinator::{ToolCall, ToolInvocation, ToolOutcome};
use crate::llm::ChatMessage;
use crate::stream::PhaseObserver;

const ID_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Created,
    Streaming,
    ProcessingTools,
    Completed,
    Failed,
}

impl InteractionStatus {
    /// A pass has started and has not reached a terminal state yet.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Created | Self::Streaming | Self::ProcessingTools)
    }
}

#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub status: InteractionStatus,
    pub messages: Vec<ChatMessage>,
    pub last_tool_result: Option<Value>,
    pub last_error: Option<String>,
}

/// Body of the progress endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionProgress {
    pub status: InteractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InteractionError {
    #[error("interaction {0} already has an active stream")]
    Busy(String),
}

struct Entry {
    interaction: Interaction,
    created: Instant,
}

/// In-flight and recently finished chat interactions.
///
/// Entries are dropped a fixed retention window after creation, whatever
/// state they are in. Expired entries are invisible immediately and removed
/// by the pruner or on next access.
#[derive(Clone)]
pub struct InteractionRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    retention: Duration,
}

impl InteractionRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Starts a pass for `requested_id`, or for a fresh id when none is given.
    ///
    /// Reusing a finished interaction keeps its creation time, so it is still
    /// evicted on the original schedule.
    pub fn begin(
        &self,
        requested_id: Option<&str>,
        messages: Vec<ChatMessage>,
    ) -> Result<String, InteractionError> {
        let now = Instant::now();
        let id = match requested_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => generate_interaction_id(),
        };

        let mut entries = self.entries.lock().expect("interaction registry lock poisoned");
        if let Some(entry) = entries.get_mut(&id)
            && !self.is_expired(entry, now)
        {
            if entry.interaction.status.is_active() {
                return Err(InteractionError::Busy(id));
            }
            entry.interaction.status = InteractionStatus::Created;
            entry.interaction.messages = messages;
            entry.interaction.last_tool_result = None;
            entry.interaction.last_error = None;
            return Ok(id);
        }

        entries.insert(
            id.clone(),
            Entry {
                interaction: Interaction {
                    id: id.clone(),
                    started_at: Utc::now(),
                    status: InteractionStatus::Created,
                    messages,
                    last_tool_result: None,
                    last_error: None,
                },
                created: now,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Interaction> {
        self.with_entry(id, |interaction| interaction.clone())
    }

    pub fn progress(&self, id: &str) -> Option<InteractionProgress> {
        self.with_entry(id, |interaction| InteractionProgress {
            status: interaction.status,
            result: interaction.last_tool_result.clone(),
            error: interaction.last_error.clone(),
        })
    }

    pub fn set_status(&self, id: &str, status: InteractionStatus) {
        self.with_entry(id, |interaction| interaction.status = status);
    }

    pub fn record_tool_result(&self, id: &str, result: Value) {
        self.with_entry(id, |interaction| interaction.last_tool_result = Some(result));
    }

    pub fn record_error(&self, id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_entry(id, |interaction| interaction.last_error = Some(message));
    }

    pub fn complete(&self, id: &str) {
        self.set_status(id, InteractionStatus::Completed);
    }

    pub fn fail(&self, id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_entry(id, |interaction| {
            interaction.status = InteractionStatus::Failed;
            interaction.last_error = Some(message);
        });
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("interaction registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spawn_pruner(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.prune_at(Instant::now());
            }
        })
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().expect("interaction registry lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired interactions");
        }
        evicted
    }

    fn with_entry<T>(&self, id: &str, apply: impl FnOnce(&mut Interaction) -> T) -> Option<T> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("interaction registry lock poisoned");
        let expired = self.is_expired(entries.get(id)?, now);
        if expired {
            entries.remove(id);
            return None;
        }
        entries
            .get_mut(id)
            .map(|entry| apply(&mut entry.interaction))
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.created) >= self.retention
    }
}

/// `int_<unix millis>_<9 random alphanumerics>`.
pub fn generate_interaction_id() -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ID_SUFFIX_LEN)
        .collect();
    format!("int_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Mirrors multiplexer phases into the registry entry for one interaction.
pub struct InteractionTracker {
    registry: InteractionRegistry,
    id: String,
}

impl InteractionTracker {
    pub fn new(registry: InteractionRegistry, id: impl Into<String>) -> Self {
        Self {
            registry,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl PhaseObserver for InteractionTracker {
    fn streaming(&self) {
        self.registry
            .set_status(&self.id, InteractionStatus::Streaming);
    }

    fn processing_tools(&self, _calls: &[ToolCall]) {
        self.registry
            .set_status(&self.id, InteractionStatus::ProcessingTools);
    }

    fn tool_finished(&self, invocation: &ToolInvocation) {
        match &invocation.outcome {
            ToolOutcome::Success(output) => {
                if let Ok(value) = serde_json::to_value(output) {
                    self.registry.record_tool_result(&self.id, value);
                }
            }
            ToolOutcome::Error(err) => self.registry.record_error(&self.id, err.to_string()),
            ToolOutcome::Pending => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tools::{ToolError, ToolOutput};

    const RETENTION: Duration = Duration::from_secs(300);

    fn invocation(outcome: ToolOutcome) -> ToolInvocation {
        ToolInvocation {
            call_id: "call_1".to_string(),
            name: "getTotalInvoices".to_string(),
            arguments: json!({ "status": "all" }),
            deadline_ms: 5000,
            outcome,
        }
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        let id = generate_interaction_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "int");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test(start_paused = true)]
    async fn interactions_are_evicted_after_retention() {
        let registry = InteractionRegistry::new(RETENTION);
        let id = registry
            .begin(Some("int_1"), vec![ChatMessage::user("hi")])
            .expect("begin");
        registry.complete(&id);

        tokio::time::advance(RETENTION - Duration::from_secs(1)).await;
        assert_eq!(
            registry.progress(&id).map(|progress| progress.status),
            Some(InteractionStatus::Completed)
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.progress(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_ignores_state() {
        let registry = InteractionRegistry::new(RETENTION);
        let id = registry.begin(None, Vec::new()).expect("begin");
        registry.set_status(&id, InteractionStatus::Streaming);

        tokio::time::advance(RETENTION).await;
        assert_eq!(registry.prune_at(Instant::now()), 1);
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pruner_removes_expired_entries() {
        let registry = InteractionRegistry::new(RETENTION);
        registry.begin(Some("a"), Vec::new()).expect("begin");
        let pruner = registry.spawn_pruner(Duration::from_secs(60));

        tokio::time::sleep(RETENTION + Duration::from_secs(61)).await;
        assert_eq!(registry.len(), 0);
        pruner.abort();
    }

    #[tokio::test]
    async fn active_interactions_reject_a_second_stream() {
        let registry = InteractionRegistry::new(RETENTION);
        let id = registry.begin(Some("int_busy"), Vec::new()).expect("begin");
        registry.set_status(&id, InteractionStatus::ProcessingTools);

        assert_eq!(
            registry.begin(Some("int_busy"), Vec::new()),
            Err(InteractionError::Busy("int_busy".to_string()))
        );

        registry.complete(&id);
        assert_eq!(
            registry.begin(Some("int_busy"), vec![ChatMessage::user("again")]),
            Ok("int_busy".to_string())
        );
        let interaction = registry.get(&id).expect("present");
        assert_eq!(interaction.status, InteractionStatus::Created);
        assert_eq!(interaction.messages.len(), 1);
    }

    #[tokio::test]
    async fn tracker_records_phases_and_tool_outcomes() {
        let registry = InteractionRegistry::new(RETENTION);
        let id = registry.begin(None, Vec::new()).expect("begin");
        let tracker = InteractionTracker::new(registry.clone(), id.clone());

        tracker.streaming();
        assert_eq!(
            registry.get(&id).map(|i| i.status),
            Some(InteractionStatus::Streaming)
        );

        tracker.processing_tools(&[]);
        tracker.tool_finished(&invocation(ToolOutcome::Success(ToolOutput::Message(
            "done".to_string(),
        ))));
        tracker.tool_finished(&invocation(ToolOutcome::Error(ToolError::Timeout {
            deadline_ms: 5000,
        })));

        let progress = registry.progress(&id).expect("progress");
        assert_eq!(progress.status, InteractionStatus::ProcessingTools);
        assert_eq!(progress.result, Some(json!("done")));
        assert_eq!(
            progress.error.as_deref(),
            Some("Tool execution timed out after 5000ms")
        );
    }

    #[test]
    fn progress_serializes_without_empty_fields() {
        let progress = InteractionProgress {
            status: InteractionStatus::ProcessingTools,
            result: None,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(progress).expect("serialize"),
            json!({ "status": "processing_tools" })
        );
    }
}
