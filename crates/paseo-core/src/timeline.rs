use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use paseo_provider::{PermissionKind, Usage};

/// One append-only entry in an Agent's timeline (§3 "Timeline entry").
///
/// `seq` is assigned by the `Timeline` on append and is strictly increasing
/// within an agent; nothing outside `Timeline::append`/`update_tool_call`
/// ever constructs one directly with a caller-chosen `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub variant: TimelineVariant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallStatus {
    Running,
    Completed,
    Errored,
}

impl Serialize for ToolCallStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            ToolCallStatus::Running => "running",
            ToolCallStatus::Completed => "completed",
            ToolCallStatus::Errored => "errored",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for ToolCallStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "running" => Ok(ToolCallStatus::Running),
            "completed" => Ok(ToolCallStatus::Completed),
            "errored" => Ok(ToolCallStatus::Errored),
            other => Err(serde::de::Error::custom(format!("unknown tool call status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineVariant {
    UserMessage { text: String },
    AssistantMessage { text: String },
    AssistantReasoning { text: String },
    ToolCall {
        call_id: String,
        name: String,
        status: ToolCallStatus,
        input: Value,
        output: Option<String>,
        kind: PermissionKind,
    },
    PermissionRequest {
        id: String,
        kind: PermissionKind,
        title: String,
        input: Value,
    },
    PermissionResolved {
        id: String,
        behavior: String,
        message: Option<String>,
    },
    TurnStarted { turn_id: String },
    TurnCompleted { turn_id: String, usage: Option<Usage> },
    Error { message: String },
}

/// Fired with a clone of every entry as it's appended or mutated, so a caller
/// (the Agent Manager) can rebroadcast it without `Timeline` itself knowing
/// anything about `ManagerEvent` (§6 `agent_stream`).
pub type AppendHook = Arc<dyn Fn(TimelineEntry) + Send + Sync>;

/// The append-only log owned by exactly one Agent (§3, invariant 2: `seq` is
/// strictly increasing with no gaps).
#[derive(Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    next_seq: u64,
    on_append: Option<AppendHook>,
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("entries", &self.entries)
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Timeline` that calls `hook` with a clone of every appended or
    /// updated entry, in addition to storing it normally.
    pub fn with_hook(hook: AppendHook) -> Self {
        Self { on_append: Some(hook), ..Self::default() }
    }

    pub fn append(&mut self, variant: TimelineVariant) -> &TimelineEntry {
        let entry = TimelineEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            variant,
        };
        self.next_seq += 1;
        self.entries.push(entry);
        let appended = self.entries.last().expect("just pushed");
        if let Some(hook) = &self.on_append {
            hook(appended.clone());
        }
        appended
    }

    /// Update an in-flight `ToolCall` entry's `status`/`output` in place by
    /// `call_id` — the one documented exception to append-only (§3).
    pub fn update_tool_call(&mut self, call_id: &str, status: ToolCallStatus, output: Option<String>) -> bool {
        for entry in self.entries.iter_mut().rev() {
            if let TimelineVariant::ToolCall { call_id: id, status: s, output: o, .. } = &mut entry.variant {
                if id == call_id {
                    *s = status;
                    *o = output;
                    let updated = entry.clone();
                    if let Some(hook) = &self.on_append {
                        hook(updated);
                    }
                    return true;
                }
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// An ordered slice for `fetch_agent_timeline_request` (§6).
    pub fn range(&self, direction: Direction, limit: usize, cursor: Option<u64>) -> Vec<TimelineEntry> {
        let mut matching: Vec<&TimelineEntry> = match direction {
            Direction::Forward => self
                .entries
                .iter()
                .filter(|e| cursor.map_or(true, |c| e.seq > c))
                .collect(),
            Direction::Backward => self
                .entries
                .iter()
                .rev()
                .filter(|e| cursor.map_or(true, |c| e.seq < c))
                .collect(),
        };
        matching.truncate(limit);
        matching.into_iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_strictly_increasing() {
        let mut t = Timeline::new();
        t.append(TimelineVariant::UserMessage { text: "a".into() });
        t.append(TimelineVariant::UserMessage { text: "b".into() });
        let seqs: Vec<u64> = t.all().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn update_tool_call_mutates_most_recent_matching_entry() {
        let mut t = Timeline::new();
        t.append(TimelineVariant::ToolCall {
            call_id: "c1".into(),
            name: "write".into(),
            status: ToolCallStatus::Running,
            input: serde_json::json!({}),
            output: None,
            kind: PermissionKind::Write,
        });
        assert!(t.update_tool_call("c1", ToolCallStatus::Completed, Some("ok".into())));
        match &t.all()[0].variant {
            TimelineVariant::ToolCall { status, output, .. } => {
                assert_eq!(*status, ToolCallStatus::Completed);
                assert_eq!(output.as_deref(), Some("ok"));
            }
            _ => panic!("expected tool call"),
        }
    }

    #[test]
    fn update_tool_call_unknown_id_returns_false() {
        let mut t = Timeline::new();
        assert!(!t.update_tool_call("missing", ToolCallStatus::Completed, None));
    }

    #[test]
    fn range_forward_respects_cursor_and_limit() {
        let mut t = Timeline::new();
        for i in 0..5 {
            t.append(TimelineVariant::UserMessage { text: i.to_string() });
        }
        let page = t.range(Direction::Forward, 2, Some(1));
        assert_eq!(page.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn range_backward_returns_most_recent_first() {
        let mut t = Timeline::new();
        for i in 0..3 {
            t.append(TimelineVariant::UserMessage { text: i.to_string() });
        }
        let page = t.range(Direction::Backward, 10, None);
        assert_eq!(page.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 1, 0]);
    }
}
