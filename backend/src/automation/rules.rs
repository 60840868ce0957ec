// Automation Rules - entity-event triggered condition/action pairs
//
// A rule watches one CRM entity event. Conditions are AND-combined and optional;
// actions run in declaration order.

use chrono::{DateTime, Utc};
use leadflow_shared::{LeadStatus, TaskPriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::actions::check_required;
use super::conditions::{all_match, Condition, ConditionField, ConditionOperator};
use super::triggers::{EntityEvent, EntityType, EventPayload, TriggerEvent};
use crate::error::{validation_error, ApiError, ApiResult, ValidationBuilder};
use crate::store::RuleStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionType {
    CreateTask,
    AssignLead,
    Notify,
    ChangeStatus,
}

impl RuleActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::AssignLead => "assign_lead",
            Self::Notify => "notify",
            Self::ChangeStatus => "change_status",
        }
    }

    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::CreateTask => &["title"],
            Self::AssignLead => &["user_id"],
            Self::Notify => &["title", "message"],
            Self::ChangeStatus => &["status"],
        }
    }
}

impl fmt::Display for RuleActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "create_task" => Ok(Self::CreateTask),
            "assign_lead" => Ok(Self::AssignLead),
            "notify" => Ok(Self::Notify),
            "change_status" => Ok(Self::ChangeStatus),
            other => Err(format!("Unknown action type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum RuleAction {
    CreateTask {
        title: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        priority: TaskPriority,
        #[serde(default)]
        due_in_days: Option<u32>,
        #[serde(default)]
        assign_to: Option<Uuid>,
    },
    AssignLead {
        user_id: Uuid,
    },
    Notify {
        title: String,
        message: String,
        /// Recipient; everyone with back office access when unset
        #[serde(default)]
        user_id: Option<Uuid>,
    },
    ChangeStatus {
        status: String,
    },
}

impl RuleAction {
    pub fn action_type(&self) -> RuleActionType {
        match self {
            Self::CreateTask { .. } => RuleActionType::CreateTask,
            Self::AssignLead { .. } => RuleActionType::AssignLead,
            Self::Notify { .. } => RuleActionType::Notify,
            Self::ChangeStatus { .. } => RuleActionType::ChangeStatus,
        }
    }

    /// Checks that depend on the entity the rule watches
    fn validate_for(&self, entity: EntityType, prefix: &str, errors: &mut ValidationBuilder) {
        match self {
            Self::CreateTask {
                title, due_in_days, ..
            } => {
                if title.trim().is_empty() {
                    errors.push(&format!("{}params.title", prefix), "Task title is required");
                }
                if due_in_days.is_some_and(|d| d > 365) {
                    errors.push(
                        &format!("{}params.due_in_days", prefix),
                        "Due date must be within a year",
                    );
                }
            }
            Self::AssignLead { .. } => {
                if entity != EntityType::Lead {
                    errors.push(
                        &format!("{}type", prefix),
                        &format!("assign_lead cannot be used on {} rules", entity),
                    );
                }
            }
            Self::Notify { title, message, .. } => {
                if title.trim().is_empty() {
                    errors.push(&format!("{}params.title", prefix), "Notification title is required");
                }
                if message.trim().is_empty() {
                    errors.push(
                        &format!("{}params.message", prefix),
                        "Notification message is required",
                    );
                }
            }
            Self::ChangeStatus { status } => {
                if status.trim().is_empty() {
                    errors.push(&format!("{}params.status", prefix), "Status is required");
                } else if entity == EntityType::Lead && status.parse::<LeadStatus>().is_err() {
                    errors.push(
                        &format!("{}params.status", prefix),
                        &format!("'{}' is not a lead status", status),
                    );
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationRule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_entity: EntityType,
    pub trigger_event: EntityEvent,
    pub conditions: Vec<Condition>,
    pub actions: Vec<RuleAction>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AutomationRule {
    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        match &event.payload {
            EventPayload::Entity { entity, event, .. } => {
                self.is_active && *entity == self.trigger_entity && *event == self.trigger_event
            }
            _ => false,
        }
    }

    /// Zero conditions always match
    pub fn matches(&self, record: &Value) -> bool {
        all_match(&self.conditions, record)
    }

    /// Actions to run for `event`, in declaration order, if the rule fires
    pub fn plan(&self, event: &TriggerEvent) -> Option<&[RuleAction]> {
        let EventPayload::Entity { record, .. } = &event.payload else {
            return None;
        };
        (self.is_triggered_by(event) && self.matches(record)).then_some(self.actions.as_slice())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionInput {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleActionInput {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Value,
}

/// Create/update body for an automation rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRuleInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_entity: String,
    pub trigger_event: String,
    #[serde(default)]
    pub conditions: Vec<ConditionInput>,
    #[serde(default)]
    pub actions: Vec<RuleActionInput>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl AutomationRuleInput {
    pub fn into_rule(self, existing: Option<&AutomationRule>) -> ApiResult<AutomationRule> {
        let mut errors = ValidationBuilder::new();

        if self.name.trim().is_empty() {
            errors.push("name", "Rule name is required");
        }
        let entity = self
            .trigger_entity
            .parse::<EntityType>()
            .map_err(|msg| errors.push("trigger_entity", &msg))
            .ok();
        let event = self
            .trigger_event
            .parse::<EntityEvent>()
            .map_err(|msg| errors.push("trigger_event", &msg))
            .ok();

        let mut conditions = Vec::with_capacity(self.conditions.len());
        for (i, input) in self.conditions.iter().enumerate() {
            let prefix = format!("conditions[{}].", i);
            let field = input
                .field
                .parse::<ConditionField>()
                .map_err(|e| errors.push(&format!("{}field", prefix), &e.to_string()))
                .ok();
            let operator = input
                .operator
                .parse::<ConditionOperator>()
                .map_err(|e| errors.push(&format!("{}operator", prefix), &e.to_string()))
                .ok();
            if let (Some(field), Some(operator)) = (field, operator) {
                let value = if operator.ignores_value() {
                    None
                } else {
                    input.value.as_deref().map(|v| v.trim().to_string())
                };
                let condition = Condition {
                    field,
                    operator,
                    value,
                };
                condition.validate_into(&prefix, &mut errors);
                conditions.push(condition);
            }
        }

        if self.actions.is_empty() {
            errors.push("actions", "Add at least one action");
        }

        let mut actions = Vec::with_capacity(self.actions.len());
        for (i, input) in self.actions.iter().enumerate() {
            let prefix = format!("actions[{}].", i);
            let kind = match input.action_type.parse::<RuleActionType>() {
                Ok(kind) => kind,
                Err(msg) => {
                    errors.push(&format!("{}type", prefix), &msg);
                    continue;
                }
            };

            let mut missing = ValidationBuilder::new();
            check_required(
                &input.params,
                kind.required_params(),
                &format!("{}params.", prefix),
                &mut missing,
            );
            if let Some(err) = missing.build() {
                errors.absorb(err)?;
                continue;
            }

            match serde_json::from_value::<RuleAction>(serde_json::json!({
                "type": kind.as_str(),
                "params": input.params,
            })) {
                Ok(action) => {
                    if let Some(entity) = entity {
                        action.validate_for(entity, &prefix, &mut errors);
                    }
                    actions.push(action);
                }
                Err(e) => errors.push(
                    &format!("{}params", prefix),
                    &format!("Invalid parameters: {}", e),
                ),
            }
        }

        errors.finish()?;
        let (Some(trigger_entity), Some(trigger_event)) = (entity, event) else {
            return Err(validation_error("trigger_entity", "Invalid trigger"));
        };

        Ok(AutomationRule {
            id: existing.map(|r| r.id).unwrap_or_else(Uuid::new_v4),
            name: self.name.trim().to_string(),
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            trigger_entity,
            trigger_event,
            conditions,
            actions,
            is_active: self
                .is_active
                .unwrap_or_else(|| existing.map(|r| r.is_active).unwrap_or(true)),
            created_at: existing.map(|r| r.created_at).unwrap_or_else(Utc::now),
            updated_at: existing.map(|_| Utc::now()),
        })
    }
}

/// One rule that fires for an event, with the actions it would run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleMatch {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub actions: Vec<RuleAction>,
}

/// Rules that fire for `event`, in the order given
pub fn evaluate_rules(rules: &[AutomationRule], event: &TriggerEvent) -> Vec<RuleMatch> {
    rules
        .iter()
        .filter_map(|rule| {
            rule.plan(event).map(|actions| RuleMatch {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                actions: actions.to_vec(),
            })
        })
        .collect()
}

pub struct RuleService<S: RuleStore + ?Sized> {
    store: Arc<S>,
}

impl<S: RuleStore + ?Sized> RuleService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> ApiResult<Vec<AutomationRule>> {
        Ok(self.store.list_automation_rules().await?)
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<AutomationRule> {
        self.store
            .get_automation_rule(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Automation rule"))
    }

    pub async fn create(&self, input: AutomationRuleInput) -> ApiResult<AutomationRule> {
        let rule = input.into_rule(None)?;
        self.store.save_automation_rule(&rule).await?;
        info!("Created automation rule {} ({})", rule.name, rule.id);
        Ok(rule)
    }

    pub async fn update(&self, id: Uuid, input: AutomationRuleInput) -> ApiResult<AutomationRule> {
        let existing = self.get(id).await?;
        let rule = input.into_rule(Some(&existing))?;
        self.store.save_automation_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        if !self.store.delete_automation_rule(id).await? {
            return Err(ApiError::not_found("Automation rule"));
        }
        Ok(())
    }

    pub async fn toggle(&self, id: Uuid) -> ApiResult<AutomationRule> {
        let mut rule = self.get(id).await?;
        rule.is_active = !rule.is_active;
        rule.updated_at = Some(Utc::now());
        self.store.save_automation_rule(&rule).await?;
        Ok(rule)
    }

    /// Dry run of an event against the stored rules
    pub async fn evaluate(&self, event: &TriggerEvent) -> ApiResult<Vec<RuleMatch>> {
        if !matches!(event.payload, EventPayload::Entity { .. }) {
            return Err(ApiError::bad_request("Automation rules only react to entity events"));
        }
        let mut rules = self.store.list_automation_rules().await?;
        rules.sort_by_key(|r| r.created_at);
        let matched = evaluate_rules(&rules, event);
        debug!("Event {} matched {} automation rules", event.event_id, matched.len());
        Ok(matched)
    }
}
