// Automation Actions - what a workflow action step does to a subscriber

use chrono::{DateTime, Duration, Utc};
use leadflow_shared::{EngagementLevel, Subscriber, TaskPriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{validation_error, ApiResult, ValidationBuilder};

/// Types of actions a workflow step can perform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AddTag,
    RemoveTag,
    UpdateLeadScore,
    UpdateEngagement,
    CreateTask,
    SendNotification,
    SendWebhook,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        Self::AddTag,
        Self::RemoveTag,
        Self::UpdateLeadScore,
        Self::UpdateEngagement,
        Self::CreateTask,
        Self::SendNotification,
        Self::SendWebhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::UpdateLeadScore => "update_lead_score",
            Self::UpdateEngagement => "update_engagement",
            Self::CreateTask => "create_task",
            Self::SendNotification => "send_notification",
            Self::SendWebhook => "send_webhook",
        }
    }

    /// Parameters that must be present in `action_config`
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::AddTag | Self::RemoveTag => &["tag_name"],
            Self::UpdateLeadScore => &["score_change"],
            Self::UpdateEngagement => &["engagement_level"],
            Self::CreateTask => &["task_title"],
            Self::SendNotification => &["notification_title", "notification_message"],
            Self::SendWebhook => &["webhook_url"],
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("Unknown action type '{}'", s))
    }
}

/// A validated action with its type-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action_type", content = "action_config", rename_all = "snake_case")]
pub enum StepAction {
    AddTag {
        tag_name: String,
    },
    RemoveTag {
        tag_name: String,
    },
    UpdateLeadScore {
        score_change: i32,
    },
    UpdateEngagement {
        engagement_level: EngagementLevel,
    },
    CreateTask {
        task_title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_description: Option<String>,
        #[serde(default)]
        task_priority: TaskPriority,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_in_days: Option<u32>,
    },
    SendNotification {
        notification_title: String,
        notification_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification_link: Option<String>,
    },
    SendWebhook {
        webhook_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook_payload: Option<Value>,
    },
}

impl StepAction {
    pub fn add_tag(tag: &str) -> Self {
        Self::AddTag {
            tag_name: tag.to_string(),
        }
    }

    pub fn remove_tag(tag: &str) -> Self {
        Self::RemoveTag {
            tag_name: tag.to_string(),
        }
    }

    pub fn score(delta: i32) -> Self {
        Self::UpdateLeadScore { score_change: delta }
    }

    pub fn task(title: &str, priority: TaskPriority, due_in_days: Option<u32>) -> Self {
        Self::CreateTask {
            task_title: title.to_string(),
            task_description: None,
            task_priority: priority,
            due_in_days,
        }
    }

    pub fn notify(title: &str, message: &str) -> Self {
        Self::SendNotification {
            notification_title: title.to_string(),
            notification_message: message.to_string(),
            notification_link: None,
        }
    }

    /// Build from the loosely typed form (`action_type` string + parameter object),
    /// checking the required-parameter table before decoding.
    pub fn from_parts(action_type: &str, config: &Value) -> ApiResult<Self> {
        let kind: ActionType = action_type
            .parse()
            .map_err(|msg: String| validation_error("action_type", &msg))?;

        let mut errors = ValidationBuilder::new();
        check_required(config, kind.required_params(), "action_config.", &mut errors);
        errors.finish()?;

        let action: StepAction = serde_json::from_value(serde_json::json!({
            "action_type": kind.as_str(),
            "action_config": config,
        }))
        .map_err(|e| validation_error("action_config", &format!("Invalid parameters: {}", e)))?;

        action.validate()?;
        Ok(action)
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::AddTag { .. } => ActionType::AddTag,
            Self::RemoveTag { .. } => ActionType::RemoveTag,
            Self::UpdateLeadScore { .. } => ActionType::UpdateLeadScore,
            Self::UpdateEngagement { .. } => ActionType::UpdateEngagement,
            Self::CreateTask { .. } => ActionType::CreateTask,
            Self::SendNotification { .. } => ActionType::SendNotification,
            Self::SendWebhook { .. } => ActionType::SendWebhook,
        }
    }

    /// The parameter object without the type tag
    pub fn config(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("action_config").map(Value::take))
            .unwrap_or(Value::Null)
    }

    pub fn validate(&self) -> ApiResult<()> {
        let mut errors = ValidationBuilder::new();

        match self {
            Self::AddTag { tag_name } | Self::RemoveTag { tag_name } => {
                if tag_name.trim().is_empty() {
                    errors.push("action_config.tag_name", "Tag name is required");
                }
            }
            Self::UpdateLeadScore { score_change } => {
                if *score_change == 0 {
                    errors.push("action_config.score_change", "Score change cannot be zero");
                }
            }
            Self::UpdateEngagement { .. } => {}
            Self::CreateTask {
                task_title,
                due_in_days,
                ..
            } => {
                if task_title.trim().is_empty() {
                    errors.push("action_config.task_title", "Task title is required");
                }
                if due_in_days.is_some_and(|d| d > 365) {
                    errors.push("action_config.due_in_days", "Due date must be within a year");
                }
            }
            Self::SendNotification {
                notification_title,
                notification_message,
                notification_link,
            } => {
                if notification_title.trim().is_empty() {
                    errors.push("action_config.notification_title", "Notification title is required");
                }
                if notification_message.trim().is_empty() {
                    errors.push(
                        "action_config.notification_message",
                        "Notification message is required",
                    );
                }
                if let Some(link) = notification_link {
                    if !link.starts_with('/') && !is_http_url(link) {
                        errors.push(
                            "action_config.notification_link",
                            "Link must be an app path or an http(s) URL",
                        );
                    }
                }
            }
            Self::SendWebhook { webhook_url, .. } => {
                if !is_http_url(webhook_url) {
                    errors.push("action_config.webhook_url", "Webhook URL must be an http(s) URL");
                }
            }
        }

        errors.finish()
    }

    /// Descriptor of what the execution engine should do
    pub fn effect(&self, now: DateTime<Utc>) -> ActionEffect {
        match self {
            Self::AddTag { tag_name } => ActionEffect::AddTag(tag_name.trim().to_string()),
            Self::RemoveTag { tag_name } => ActionEffect::RemoveTag(tag_name.trim().to_string()),
            Self::UpdateLeadScore { score_change } => ActionEffect::AdjustScore(*score_change),
            Self::UpdateEngagement { engagement_level } => {
                ActionEffect::SetEngagement(*engagement_level)
            }
            Self::CreateTask {
                task_title,
                task_description,
                task_priority,
                due_in_days,
            } => ActionEffect::CreateTask(TaskPayload {
                title: task_title.clone(),
                description: task_description.clone(),
                priority: *task_priority,
                due_at: due_in_days.and_then(|d| now.checked_add_signed(Duration::days(d as i64))),
            }),
            Self::SendNotification {
                notification_title,
                notification_message,
                notification_link,
            } => ActionEffect::Notify(NotificationPayload {
                title: notification_title.clone(),
                message: notification_message.clone(),
                link: notification_link.clone(),
            }),
            Self::SendWebhook {
                webhook_url,
                webhook_payload,
            } => ActionEffect::Webhook(WebhookTarget {
                url: webhook_url.clone(),
                payload: webhook_payload.clone(),
            }),
        }
    }
}

/// Record problems for keys missing from a parameter object
pub(crate) fn check_required(
    config: &Value,
    required: &[&str],
    prefix: &str,
    errors: &mut ValidationBuilder,
) {
    for param in required {
        let present = match config.get(*param) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            errors.push(&format!("{}{}", prefix, param), &format!("{} is required", param));
        }
    }
}

pub(crate) fn is_http_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookTarget {
    pub url: String,
    pub payload: Option<Value>,
}

/// Effect descriptor handed to the execution engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "effect", content = "detail", rename_all = "snake_case")]
pub enum ActionEffect {
    AddTag(String),
    RemoveTag(String),
    AdjustScore(i32),
    SetEngagement(EngagementLevel),
    CreateTask(TaskPayload),
    Notify(NotificationPayload),
    Webhook(WebhookTarget),
}

impl ActionEffect {
    /// Apply record-local effects to a subscriber. Returns whether anything changed;
    /// tasks, notifications and webhooks never touch the record.
    pub fn apply_to(&self, subscriber: &mut Subscriber) -> bool {
        match self {
            Self::AddTag(tag) => add_tag(&mut subscriber.tags, tag),
            Self::RemoveTag(tag) => remove_tag(&mut subscriber.tags, tag),
            Self::AdjustScore(delta) => {
                let next = adjust_score(subscriber.lead_score, *delta);
                let changed = next != subscriber.lead_score;
                subscriber.lead_score = next;
                changed
            }
            Self::SetEngagement(level) => {
                let changed = subscriber.engagement() != Some(*level);
                subscriber.engagement_level = Some(level.as_str().to_string());
                changed
            }
            Self::CreateTask(_) | Self::Notify(_) | Self::Webhook(_) => false,
        }
    }
}

/// Idempotent, case-insensitive tag insert
pub fn add_tag(tags: &mut Vec<String>, tag: &str) -> bool {
    let tag = tag.trim();
    if tag.is_empty() || tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
        return false;
    }
    tags.push(tag.to_string());
    true
}

pub fn remove_tag(tags: &mut Vec<String>, tag: &str) -> bool {
    let before = tags.len();
    tags.retain(|t| !t.eq_ignore_ascii_case(tag.trim()));
    tags.len() != before
}

/// Scores never drop below zero
pub fn adjust_score(current: i32, delta: i32) -> i32 {
    current.saturating_add(delta).max(0)
}
