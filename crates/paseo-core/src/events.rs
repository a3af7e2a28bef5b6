use crate::agent::AgentSnapshot;
use crate::timeline::TimelineEntry;

/// Lifecycle events the Agent Manager announces for every registry mutation,
/// every turn completion (§4.2 "Each emits an `agent_update{kind}` event
/// containing the current snapshot."), and every timeline append. Consumed
/// by the Session hub to drive `agent_update`/`agent_deleted`/`agent_stream`
/// broadcasts.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Upsert(AgentSnapshot),
    Delete(String),
    /// One new or updated `TimelineEntry` for `agent_id`, fired the instant
    /// `Timeline::append`/`update_tool_call` runs (§6 `agent_stream`: "one
    /// message per new timeline entry, pushed in real time").
    Timeline { agent_id: String, entry: TimelineEntry },
}
