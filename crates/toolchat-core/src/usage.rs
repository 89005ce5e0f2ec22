use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token accounting for one model call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEvent {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub request_type: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl UsageEvent {
    pub fn new(
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        request_type: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            request_type: request_type.into(),
            user_id: None,
            session_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub event_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UsageStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub event_count: u64,
    pub model_breakdown: BTreeMap<String, ModelUsage>,
}

pub trait UsageTracker: Send + Sync {
    fn track_usage(&self, event: UsageEvent);

    /// Aggregate over all recorded events, optionally for one user.
    fn current_usage(&self, user_id: Option<&str>) -> UsageStats;
}

pub struct NoOpUsageTracker;

impl UsageTracker for NoOpUsageTracker {
    fn track_usage(&self, _event: UsageEvent) {}

    fn current_usage(&self, _user_id: Option<&str>) -> UsageStats {
        UsageStats::default()
    }
}

#[derive(Default)]
pub struct InMemoryUsageTracker {
    events: Mutex<Vec<UsageEvent>>,
}

impl InMemoryUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl UsageTracker for InMemoryUsageTracker {
    fn track_usage(&self, event: UsageEvent) {
        tracing::debug!(
            model = %event.model,
            request_type = %event.request_type,
            total_tokens = event.total_tokens,
            "usage recorded"
        );
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    fn current_usage(&self, user_id: Option<&str>) -> UsageStats {
        let events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut stats = UsageStats::default();
        for event in events
            .iter()
            .filter(|e| user_id.map_or(true, |u| e.user_id.as_deref() == Some(u)))
        {
            stats.total_input_tokens += event.input_tokens;
            stats.total_output_tokens += event.output_tokens;
            stats.total_tokens += event.total_tokens;
            stats.event_count += 1;

            let model = stats.model_breakdown.entry(event.model.clone()).or_default();
            model.input_tokens += event.input_tokens;
            model.output_tokens += event.output_tokens;
            model.total_tokens += event.total_tokens;
            model.event_count += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> UsageEvent {
        UsageEvent::new("gpt-4o-mini", 10, 20, "chat")
            .with_user("test_user")
            .with_session("test_session")
    }

    #[test]
    fn event_totals_and_defaults() {
        let event = UsageEvent::new("gpt-4o-mini", 10, 20, "chat");
        assert_eq!(event.total_tokens, 30);
        assert!(event.user_id.is_none());
        assert!(event.session_id.is_none());
        assert!(event.metadata.is_empty());

        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["user_id"], "test_user");
        assert_eq!(json["total_tokens"], 30);
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn noop_tracker_records_nothing() {
        let tracker = NoOpUsageTracker;
        tracker.track_usage(sample_event());
        let stats = tracker.current_usage(None);
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.event_count, 0);
    }

    #[test]
    fn in_memory_tracker_aggregates_and_filters() {
        let tracker = InMemoryUsageTracker::new();
        tracker.track_usage(sample_event());
        tracker.track_usage(UsageEvent::new("gpt-4o-mini", 5, 5, "chat").with_user("other_user"));
        tracker.track_usage(UsageEvent::new("gpt-4o", 1, 2, "reply").with_user("test_user"));

        let all = tracker.current_usage(None);
        assert_eq!(all.event_count, 3);
        assert_eq!(all.total_tokens, 43);
        assert_eq!(all.model_breakdown["gpt-4o-mini"].total_tokens, 40);
        assert_eq!(all.model_breakdown["gpt-4o"].event_count, 1);

        let mine = tracker.current_usage(Some("test_user"));
        assert_eq!(mine.total_input_tokens, 11);
        assert_eq!(mine.total_output_tokens, 22);
        assert_eq!(mine.event_count, 2);
    }
}
