use std::{collections::HashSet, time::Duration};

use axum::response::sse::{Event, KeepAlive};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use orgsvc_core::types::EmployeeView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeEventKind {
    EmployeeCreated,
    EmployeeUpdated,
    EmployeeDeleted,
}

impl EmployeeEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmployeeCreated => "EMPLOYEE_CREATED",
            Self::EmployeeUpdated => "EMPLOYEE_UPDATED",
            Self::EmployeeDeleted => "EMPLOYEE_DELETED",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" | "employee_created" => Some(Self::EmployeeCreated),
            "updated" | "employee_updated" => Some(Self::EmployeeUpdated),
            "deleted" | "employee_deleted" => Some(Self::EmployeeDeleted),
            _ => None,
        }
    }
}

/// Employee lifecycle notification published after a committed mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeEvent {
    pub event_id: String,
    pub event_type: EmployeeEventKind,
    pub timestamp: DateTime<Utc>,
    pub employee_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee: Option<EmployeeView>,
}

impl EmployeeEvent {
    fn new(
        event_type: EmployeeEventKind,
        employee_id: i64,
        employee: Option<EmployeeView>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp,
            employee_id,
            employee,
        }
    }

    pub fn created(employee: &EmployeeView, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            EmployeeEventKind::EmployeeCreated,
            employee.id,
            Some(employee.clone()),
            timestamp,
        )
    }

    pub fn updated(employee: &EmployeeView, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            EmployeeEventKind::EmployeeUpdated,
            employee.id,
            Some(employee.clone()),
            timestamp,
        )
    }

    pub fn deleted(employee_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self::new(EmployeeEventKind::EmployeeDeleted, employee_id, None, timestamp)
    }

    pub fn into_sse_event(self) -> Result<Event, serde_json::Error> {
        let event = Event::default()
            .event(self.event_type.as_str())
            .id(self.event_id.clone());
        let data = serde_json::to_string(&self)?;
        Ok(event.data(data))
    }
}

/// In-process fan-out of employee events.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<EmployeeEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(128);
        Self { sender }
    }

    pub fn publish(&self, event: EmployeeEvent) {
        counter!("employee_events_total", "type" => event.event_type.as_str()).increment(1);
        let kind = event.event_type.as_str();
        let employee_id = event.employee_id;
        if self.sender.send(event).is_err() {
            debug!(stage = "events", kind, employee_id, "no subscribers for employee event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EmployeeEvent> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: Option<HashSet<EmployeeEventKind>>,
}

impl EventFilter {
    pub fn from_kinds(kinds: Option<HashSet<EmployeeEventKind>>) -> Self {
        Self { kinds }
    }

    pub fn matches(&self, event: &EmployeeEvent) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&event.event_type),
            None => true,
        }
    }
}

pub fn event_stream(
    hub: EventHub,
    filter: EventFilter,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    BroadcastStream::new(hub.subscribe()).filter_map(move |result| match result {
        Ok(event) if filter.matches(&event) => Some(event.into_sse_event()),
        Ok(_) => None,
        Err(err) => {
            warn!(stage = "events", error = %err, "event subscriber lagged");
            None
        }
    })
}

pub fn event_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}

pub fn parse_kind_list(value: Option<String>) -> Result<Option<HashSet<EmployeeEventKind>>, String> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let mut set = HashSet::new();
    for item in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let kind = EmployeeEventKind::parse(item)
            .ok_or_else(|| format!("unknown event kind '{}'", item.trim()))?;
        set.insert(kind);
    }

    if set.is_empty() {
        Ok(None)
    } else {
        Ok(Some(set))
    }
}
