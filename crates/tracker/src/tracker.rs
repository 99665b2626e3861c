//! Per-call lifecycle state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use proto::{CallId, InvocationOutcome, InvocationPhase, InvocationUpdate};
use serde_json::Value;
use tracing::debug;

use crate::state::InvocationState;
use crate::view::{InvocationView, RenderContext};

/// What [`LifecycleTracker::apply`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First message for this id; the entry starts in the reported state.
    Inserted(InvocationState),
    /// Entry moved forward.
    Advanced {
        from: InvocationState,
        to: InvocationState,
    },
    /// Another streaming chunk replaced the partial arguments.
    Refreshed,
    /// Duplicate, backward or post-terminal message; nothing changed.
    Ignored,
}

/// When a screenshot was taken relative to the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Moment {
    Before,
    After,
}

/// Screenshots correlated with one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screenshots {
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

/// Recorded lifecycle of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationEntry {
    pub call_id: CallId,
    pub tool_name: Option<String>,
    pub state: InvocationState,
    /// Raw argument text as streamed. Never truncated.
    pub args_text: String,
    pub args: Value,
    /// Set once the entry reaches [`InvocationState::Result`].
    pub outcome: Option<InvocationOutcome>,
    /// States visited, in order.
    pub visited: Vec<InvocationState>,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvocationEntry {
    fn new(update: InvocationUpdate) -> Self {
        let now = Utc::now();
        let state = InvocationState::of(&update.phase);
        let mut entry = Self {
            call_id: update.call_id,
            tool_name: update.tool_name,
            state,
            args_text: String::new(),
            args: Value::Null,
            outcome: None,
            visited: vec![state],
            first_seen: now,
            updated_at: now,
        };
        entry.absorb(update.phase);
        entry
    }

    fn absorb(&mut self, phase: InvocationPhase) {
        match phase {
            InvocationPhase::Streaming { args_text, args } => {
                self.args_text = args_text;
                self.args = args;
            }
            InvocationPhase::Call { args } => self.args = args,
            InvocationPhase::Result { args, outcome } => {
                self.args = args;
                self.outcome = Some(outcome);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Terminal and aborted by the user.
    pub fn is_aborted(&self) -> bool {
        self.outcome
            .as_ref()
            .is_some_and(InvocationOutcome::is_aborted)
    }

    /// Terminal with a sandbox failure.
    pub fn is_failed(&self) -> bool {
        self.outcome
            .as_ref()
            .is_some_and(|o| o.error().is_some())
    }

    /// `action` argument, when present.
    pub fn action(&self) -> Option<&str> {
        self.args.get("action").and_then(Value::as_str)
    }
}

/// Tracks every invocation seen, in first-seen order.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    order: Vec<CallId>,
    entries: HashMap<CallId, InvocationEntry>,
    screenshots: HashMap<CallId, Screenshots>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one update.
    ///
    /// Updates must be fed in emission order. A terminal entry never
    /// changes again.
    pub fn apply(&mut self, update: InvocationUpdate) -> Transition {
        let to = InvocationState::of(&update.phase);

        let Some(entry) = self.entries.get_mut(&update.call_id) else {
            debug!(call_id = %update.call_id, state = %to, "Tracking new invocation");
            self.order.push(update.call_id.clone());
            self.entries
                .insert(update.call_id.clone(), InvocationEntry::new(update));
            return Transition::Inserted(to);
        };

        let from = entry.state;
        if from.is_terminal() || to < from {
            debug!(call_id = %entry.call_id, %from, %to, "Ignoring stale invocation update");
            return Transition::Ignored;
        }
        if to == from && to != InvocationState::Streaming {
            debug!(call_id = %entry.call_id, state = %to, "Ignoring duplicate invocation update");
            return Transition::Ignored;
        }

        if entry.tool_name.is_none() {
            entry.tool_name = update.tool_name;
        }
        entry.absorb(update.phase);

        if to == from {
            return Transition::Refreshed;
        }
        entry.state = to;
        entry.visited.push(to);
        Transition::Advanced { from, to }
    }

    /// Applies updates in order.
    pub fn apply_all(&mut self, updates: impl IntoIterator<Item = InvocationUpdate>) {
        for update in updates {
            self.apply(update);
        }
    }

    pub fn state(&self, call_id: &CallId) -> Option<InvocationState> {
        self.entries.get(call_id).map(|e| e.state)
    }

    pub fn entry(&self, call_id: &CallId) -> Option<&InvocationEntry> {
        self.entries.get(call_id)
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &InvocationEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Correlates a screenshot with a call. May arrive before the call's
    /// first update; a later capture for the same moment replaces the
    /// earlier one.
    pub fn attach_screenshot(&mut self, call_id: CallId, moment: Moment, png: Vec<u8>) {
        let shots = self.screenshots.entry(call_id).or_default();
        match moment {
            Moment::Before => shots.before = Some(png),
            Moment::After => shots.after = Some(png),
        }
    }

    pub fn screenshots(&self, call_id: &CallId) -> Option<&Screenshots> {
        self.screenshots.get(call_id)
    }

    /// Renderer view of one call.
    pub fn view(&self, call_id: &CallId, ctx: RenderContext) -> Option<InvocationView> {
        let entry = self.entries.get(call_id)?;
        Some(InvocationView::build(
            entry,
            self.screenshots.get(call_id),
            ctx,
        ))
    }

    /// Views of all calls in first-seen order. `is_latest` holds for every
    /// call; this tracker is scoped to the latest turn.
    pub fn views(&self, busy: bool) -> Vec<InvocationView> {
        let ctx = RenderContext {
            is_latest: true,
            busy,
        };
        self.iter()
            .map(|entry| InvocationView::build(entry, self.screenshots.get(&entry.call_id), ctx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proto::ToolPayload;
    use serde_json::json;

    use super::*;

    fn id(s: &str) -> CallId {
        CallId::from(s)
    }

    fn click_args() -> Value {
        json!({"action": "left_click", "coordinate": [100, 200]})
    }

    #[test]
    fn visits_streaming_call_result_in_order() {
        let mut tracker = LifecycleTracker::new();
        let mut sampled = Vec::new();

        tracker.apply(InvocationUpdate::streaming(
            id("1"),
            Some("computer_use"),
            "{\"action\":\"left",
            Value::Null,
        ));
        sampled.push(tracker.state(&id("1")));
        tracker.apply(InvocationUpdate::call(id("1"), "computer_use", click_args()));
        sampled.push(tracker.state(&id("1")));
        tracker.apply(InvocationUpdate::completed(
            id("1"),
            "computer_use",
            click_args(),
            ToolPayload::Text("Left clicked at 100, 200".into()),
        ));
        sampled.push(tracker.state(&id("1")));

        assert_eq!(
            sampled,
            vec![
                Some(InvocationState::Streaming),
                Some(InvocationState::Call),
                Some(InvocationState::Result)
            ]
        );
        let entry = tracker.entry(&id("1")).expect("entry");
        assert_eq!(
            entry.visited,
            vec![
                InvocationState::Streaming,
                InvocationState::Call,
                InvocationState::Result
            ]
        );
    }

    #[test]
    fn first_message_sets_initial_state_without_synthesis() {
        let mut tracker = LifecycleTracker::new();
        let t = tracker.apply(InvocationUpdate::call(id("x"), "bash_command", json!({"command": "ls"})));
        assert_eq!(t, Transition::Inserted(InvocationState::Call));
        assert_eq!(
            tracker.entry(&id("x")).map(|e| e.visited.clone()),
            Some(vec![InvocationState::Call])
        );
    }

    #[test]
    fn duplicate_result_leaves_entry_unchanged() {
        let mut tracker = LifecycleTracker::new();
        tracker.apply(InvocationUpdate::completed(
            id("1"),
            "bash_command",
            json!({"command": "echo hi"}),
            ToolPayload::Text("hi\n".into()),
        ));
        let before = tracker.entry(&id("1")).cloned();

        let t = tracker.apply(InvocationUpdate::completed(
            id("1"),
            "bash_command",
            json!({"command": "echo bye"}),
            ToolPayload::Text("bye\n".into()),
        ));
        assert_eq!(t, Transition::Ignored);
        assert_eq!(tracker.entry(&id("1")).cloned(), before);
    }

    #[test]
    fn backward_and_post_terminal_messages_are_ignored() {
        let mut tracker = LifecycleTracker::new();
        tracker.apply(InvocationUpdate::call(id("1"), "computer_use", click_args()));
        assert_eq!(
            tracker.apply(InvocationUpdate::streaming(id("1"), None, "{", Value::Null)),
            Transition::Ignored
        );
        assert_eq!(
            tracker.apply(InvocationUpdate::call(id("1"), "computer_use", click_args())),
            Transition::Ignored
        );

        tracker.apply(InvocationUpdate::aborted(id("1"), "computer_use", click_args()));
        assert_eq!(
            tracker.apply(InvocationUpdate::call(id("1"), "computer_use", click_args())),
            Transition::Ignored
        );
        assert_eq!(tracker.state(&id("1")), Some(InvocationState::Result));
    }

    #[test]
    fn streaming_chunks_refresh_partial_args() {
        let mut tracker = LifecycleTracker::new();
        tracker.apply(InvocationUpdate::streaming(id("1"), None, "{\"act", Value::Null));
        let t = tracker.apply(InvocationUpdate::streaming(
            id("1"),
            Some("computer_use"),
            "{\"action\":\"screenshot\"",
            json!({"action": "screenshot"}),
        ));
        assert_eq!(t, Transition::Refreshed);

        let entry = tracker.entry(&id("1")).expect("entry");
        assert_eq!(entry.args_text, "{\"action\":\"screenshot\"");
        assert_eq!(entry.tool_name.as_deref(), Some("computer_use"));
        assert_eq!(entry.action(), Some("screenshot"));
        assert_eq!(entry.visited, vec![InvocationState::Streaming]);
    }

    #[test]
    fn abort_is_terminal_and_distinct_from_matching_text() {
        let mut tracker = LifecycleTracker::new();
        tracker.apply(InvocationUpdate::aborted(id("a"), "computer_use", click_args()));
        tracker.apply(InvocationUpdate::completed(
            id("b"),
            "bash_command",
            json!({"command": "echo"}),
            ToolPayload::Text("User aborted the action".into()),
        ));

        assert!(tracker.entry(&id("a")).is_some_and(InvocationEntry::is_aborted));
        assert!(!tracker.entry(&id("b")).is_some_and(InvocationEntry::is_aborted));
        assert_eq!(tracker.state(&id("a")), Some(InvocationState::Result));
    }

    #[test]
    fn iterates_in_first_seen_order() {
        let mut tracker = LifecycleTracker::new();
        tracker.apply_all([
            InvocationUpdate::call(id("b"), "bash_command", json!({"command": "ls"})),
            InvocationUpdate::call(id("a"), "bash_command", json!({"command": "pwd"})),
            InvocationUpdate::completed(
                id("b"),
                "bash_command",
                json!({"command": "ls"}),
                ToolPayload::Text("x".into()),
            ),
        ]);
        let ids: Vec<&str> = tracker.iter().map(|e| e.call_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn screenshots_attach_independently_of_state() {
        let mut tracker = LifecycleTracker::new();
        tracker.attach_screenshot(id("1"), Moment::Before, vec![1]);
        tracker.apply(InvocationUpdate::call(id("1"), "computer_use", click_args()));
        tracker.attach_screenshot(id("1"), Moment::After, vec![2]);

        assert_eq!(
            tracker.screenshots(&id("1")),
            Some(&Screenshots {
                before: Some(vec![1]),
                after: Some(vec![2])
            })
        );
        assert_eq!(tracker.state(&id("1")), Some(InvocationState::Call));
    }
}
