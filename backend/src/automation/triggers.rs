// Automation Triggers - events consumed by the external execution engine
//
// Nothing here schedules or runs anything. These are the shapes that cross the
// boundary: the back office validates definitions, the engine receives events
// and asks each definition whether it fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What starts a subscriber workflow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    OnSubscribe,
    OnSegmentJoin,
    Webhook,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::OnSubscribe => "on_subscribe",
            Self::OnSegmentJoin => "on_segment_join",
            Self::Webhook => "webhook",
        }
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual" => Ok(Self::Manual),
            "on_subscribe" => Ok(Self::OnSubscribe),
            "on_segment_join" => Ok(Self::OnSegmentJoin),
            "webhook" => Ok(Self::Webhook),
            other => Err(format!("Unknown trigger type '{}'", other)),
        }
    }
}

/// CRM entities automation rules can watch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Lead,
    Task,
    Approval,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Task => "task",
            Self::Approval => "approval",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lead" => Ok(Self::Lead),
            "task" => Ok(Self::Task),
            "approval" => Ok(Self::Approval),
            other => Err(format!("Unknown entity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityEvent {
    Created,
    Updated,
    StatusChanged,
}

impl EntityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
        }
    }
}

impl FromStr for EntityEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "status_changed" => Ok(Self::StatusChanged),
            other => Err(format!("Unknown entity event '{}'", other)),
        }
    }
}

/// Event body, tagged by `trigger`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum EventPayload {
    Manual {
        workflow_id: Uuid,
        subscriber_id: Uuid,
    },
    Subscribed {
        subscriber_id: Uuid,
    },
    SegmentJoined {
        subscriber_id: Uuid,
        segment_id: Uuid,
    },
    Webhook {
        hook_key: String,
        #[serde(default)]
        body: serde_json::Value,
    },
    Entity {
        entity: EntityType,
        event: EntityEvent,
        /// The entity record, keyed by field name
        record: serde_json::Value,
    },
}

/// An event handed to the execution engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl TriggerEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn manual(workflow_id: Uuid, subscriber_id: Uuid) -> Self {
        Self::new(EventPayload::Manual {
            workflow_id,
            subscriber_id,
        })
    }

    pub fn subscribed(subscriber_id: Uuid) -> Self {
        Self::new(EventPayload::Subscribed { subscriber_id })
    }

    pub fn segment_joined(subscriber_id: Uuid, segment_id: Uuid) -> Self {
        Self::new(EventPayload::SegmentJoined {
            subscriber_id,
            segment_id,
        })
    }

    pub fn webhook(hook_key: &str, body: serde_json::Value) -> Self {
        Self::new(EventPayload::Webhook {
            hook_key: hook_key.to_string(),
            body,
        })
    }

    pub fn entity(entity: EntityType, event: EntityEvent, record: serde_json::Value) -> Self {
        Self::new(EventPayload::Entity {
            entity,
            event,
            record,
        })
    }

    /// Subscriber the event concerns, when it concerns one
    pub fn subscriber_id(&self) -> Option<Uuid> {
        match &self.payload {
            EventPayload::Manual { subscriber_id, .. }
            | EventPayload::Subscribed { subscriber_id }
            | EventPayload::SegmentJoined { subscriber_id, .. } => Some(*subscriber_id),
            EventPayload::Webhook { .. } | EventPayload::Entity { .. } => None,
        }
    }
}
