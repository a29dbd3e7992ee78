//! User-visible events recorded against declarations and build units.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::resource::ObjectReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// The record the event is about.
    pub object: ObjectReference,
    pub event_type: EventType,
    /// Short machine-readable reason, e.g. `created`.
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn normal(
        object: ObjectReference,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object,
            event_type: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn warning(
        object: ObjectReference,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: EventType::Warning,
            ..Self::normal(object, reason, message)
        }
    }
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => log::info!(
                "[{}] {}: {}",
                event.object,
                event.reason,
                event.message
            ),
            EventType::Warning => log::warn!(
                "[{}] {}: {}",
                event.object,
                event.reason,
                event.message
            ),
        }
    }
}

/// Keeps events in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events with the given reason, in recording order.
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Capitalizes the first character, e.g. `created` becomes `Created`.
pub(crate) fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
