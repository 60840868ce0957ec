// Workflow Steps - the four step kinds and their payloads
//
// A step's payload is a sum type, so exactly one kind's fields exist at a time.
// `StepFields` is the flat shape used on the wire and in the `workflow_steps`
// table; conversion in either direction drops every other kind's columns.

use chrono::{DateTime, Duration, Utc};
use leadflow_shared::Subscriber;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

use super::actions::StepAction;
use super::conditions::{Condition, ConditionField, ConditionOperator};
use crate::error::{validation_error, ApiResult, ValidationBuilder};

pub const SUBJECT_MAX_LEN: usize = 200;

/// Longest wait a single delay step may hold
pub const MAX_DELAY_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Email,
    Delay,
    Condition,
    Action,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Delay => "delay",
            Self::Condition => "condition",
            Self::Action => "action",
        }
    }

    fn default_name(&self) -> &'static str {
        match self {
            Self::Email => "Send email",
            Self::Delay => "Wait",
            Self::Condition => "Check condition",
            Self::Action => "Perform action",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "email" => Ok(Self::Email),
            "delay" => Ok(Self::Delay),
            "condition" => Ok(Self::Condition),
            "action" => Ok(Self::Action),
            other => Err(format!("Unknown step type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl DelayUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Self::Minutes => 1,
            Self::Hours => 60,
            Self::Days => 24 * 60,
            Self::Weeks => 7 * 24 * 60,
        }
    }

    pub fn duration(&self, value: u32) -> Duration {
        Duration::minutes(value as i64 * self.minutes())
    }
}

impl FromStr for DelayUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "minutes" => Ok(Self::Minutes),
            "hours" => Ok(Self::Hours),
            "days" => Ok(Self::Days),
            "weeks" => Ok(Self::Weeks),
            other => Err(format!("Unknown delay unit '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelaySpec {
    pub value: u32,
    pub unit: DelayUnit,
}

impl DelaySpec {
    pub fn duration(&self) -> Duration {
        self.unit.duration(self.value)
    }
}

/// Personalization placeholders an email may use
pub const PLACEHOLDERS: [&str; 5] = ["name", "first_name", "email", "source", "company"];

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

impl EmailContent {
    /// Placeholder names used in subject and body, in order of first use
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for text in [&self.subject, &self.body] {
            for cap in PLACEHOLDER_RE.captures_iter(text) {
                let name = cap[1].to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute known placeholders; absent values render empty
    pub fn render(&self, subscriber: &Subscriber) -> RenderedEmail {
        RenderedEmail {
            subject: render_text(&self.subject, subscriber),
            body: render_text(&self.body, subscriber),
        }
    }
}

fn render_text(text: &str, subscriber: &Subscriber) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |cap: &regex::Captures| {
            let value = match &cap[1] {
                "name" => subscriber.name.clone(),
                "first_name" => subscriber
                    .name
                    .as_deref()
                    .and_then(|n| n.split_whitespace().next())
                    .map(str::to_string),
                "email" => Some(subscriber.email.clone()),
                "source" => subscriber.source.clone(),
                "company" => subscriber.company.clone(),
                _ => return cap[0].to_string(),
            };
            value.unwrap_or_default()
        })
        .into_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Condition step: evaluate, then jump to a branch target or fall through
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchCondition {
    pub condition: Condition,
    pub true_next_step: Option<i32>,
    pub false_next_step: Option<i32>,
}

impl BranchCondition {
    pub fn target(&self, outcome: bool) -> Option<i32> {
        if outcome {
            self.true_next_step
        } else {
            self.false_next_step
        }
    }

    pub fn has_target(&self) -> bool {
        self.true_next_step.is_some() || self.false_next_step.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepPayload {
    Email(EmailContent),
    Delay(DelaySpec),
    Condition(BranchCondition),
    Action(StepAction),
}

impl StepPayload {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Email(_) => StepKind::Email,
            Self::Delay(_) => StepKind::Delay,
            Self::Condition(_) => StepKind::Condition,
            Self::Action(_) => StepKind::Action,
        }
    }

    /// Build from the flat form. Only the declared kind's fields are read;
    /// anything set for another kind is discarded.
    pub fn from_fields(step_type: &str, fields: &StepFields) -> ApiResult<Self> {
        let kind: StepKind = step_type
            .parse()
            .map_err(|msg: String| validation_error("step_type", &msg))?;
        let mut errors = ValidationBuilder::new();

        let payload = match kind {
            StepKind::Email => {
                let subject = fields.email_subject.clone().unwrap_or_default();
                let body = fields.email_body.clone().unwrap_or_default();
                if subject.trim().is_empty() {
                    errors.push("email_subject", "Email subject is required");
                } else if subject.chars().count() > SUBJECT_MAX_LEN {
                    errors.push(
                        "email_subject",
                        &format!("Email subject must be {} characters or less", SUBJECT_MAX_LEN),
                    );
                }
                if body.trim().is_empty() {
                    errors.push("email_body", "Email body is required");
                }
                let content = EmailContent { subject, body };
                for name in content.placeholders() {
                    if !PLACEHOLDERS.contains(&name.as_str()) {
                        errors.push("email_body", &format!("Unknown placeholder '{{{{{}}}}}'", name));
                    }
                }
                Some(StepPayload::Email(content))
            }
            StepKind::Delay => {
                let unit = match fields.delay_unit.as_deref().map(str::parse::<DelayUnit>) {
                    Some(Ok(unit)) => Some(unit),
                    Some(Err(msg)) => {
                        errors.push("delay_unit", &msg);
                        None
                    }
                    None => {
                        errors.push("delay_unit", "Delay unit is required");
                        None
                    }
                };
                let value = match fields.delay_value {
                    Some(v) if v >= 0 => Some(v as u32),
                    Some(_) => {
                        errors.push("delay_value", "Delay cannot be negative");
                        None
                    }
                    None => {
                        errors.push("delay_value", "Delay value is required");
                        None
                    }
                };
                match (value, unit) {
                    (Some(value), Some(unit)) if value as i64 * unit.minutes() > MAX_DELAY_MINUTES => {
                        errors.push("delay_value", "Delay cannot be longer than 365 days");
                        None
                    }
                    (Some(value), Some(unit)) => Some(StepPayload::Delay(DelaySpec { value, unit })),
                    _ => None,
                }
            }
            StepKind::Condition => {
                let field = match fields.condition_field.as_deref().map(str::parse::<ConditionField>) {
                    Some(Ok(field)) => Some(field),
                    Some(Err(e)) => {
                        errors.push("condition_field", &e.to_string());
                        None
                    }
                    None => {
                        errors.push("condition_field", "Condition field is required");
                        None
                    }
                };
                let operator = match fields
                    .condition_operator
                    .as_deref()
                    .map(str::parse::<ConditionOperator>)
                {
                    Some(Ok(op)) => Some(op),
                    Some(Err(e)) => {
                        errors.push("condition_operator", &e.to_string());
                        None
                    }
                    None => {
                        errors.push("condition_operator", "Condition operator is required");
                        None
                    }
                };
                if fields.true_next_step.is_none() && fields.false_next_step.is_none() {
                    errors.push(
                        "true_next_step",
                        "At least one of the true or false branch targets is required",
                    );
                }
                for (key, target) in [
                    ("true_next_step", fields.true_next_step),
                    ("false_next_step", fields.false_next_step),
                ] {
                    if target.is_some_and(|t| t < 1) {
                        errors.push(key, "Branch target must be a positive step order");
                    }
                }

                match (field, operator) {
                    (Some(field), Some(operator)) => {
                        let value = if operator.ignores_value() {
                            None
                        } else {
                            fields.condition_value.as_deref().map(|v| v.trim().to_string())
                        };
                        let condition = Condition {
                            field,
                            operator,
                            value,
                        };
                        condition.validate_into("condition_", &mut errors);
                        Some(StepPayload::Condition(BranchCondition {
                            condition,
                            true_next_step: fields.true_next_step,
                            false_next_step: fields.false_next_step,
                        }))
                    }
                    _ => None,
                }
            }
            StepKind::Action => {
                let Some(action_type) = fields.action_type.as_deref() else {
                    errors.push("action_type", "Action type is required");
                    return Err(errors.build().unwrap_or_else(|| validation_error("action_type", "required")));
                };
                let config = fields.action_config.clone().unwrap_or(Value::Object(Default::default()));
                match StepAction::from_parts(action_type, &config) {
                    Ok(action) => Some(StepPayload::Action(action)),
                    Err(e) => {
                        errors.absorb(e)?;
                        None
                    }
                }
            }
        };

        errors.finish()?;
        payload.ok_or_else(|| validation_error("step_type", "Incomplete step"))
    }

    /// The flat form with only this kind's fields populated
    pub fn to_fields(&self) -> StepFields {
        let mut fields = StepFields::default();
        match self {
            Self::Email(email) => {
                fields.email_subject = Some(email.subject.clone());
                fields.email_body = Some(email.body.clone());
            }
            Self::Delay(delay) => {
                fields.delay_value = Some(delay.value as i32);
                fields.delay_unit = Some(delay.unit.as_str().to_string());
            }
            Self::Condition(branch) => {
                fields.condition_field = Some(branch.condition.field.as_str().to_string());
                fields.condition_operator = Some(branch.condition.operator.as_str().to_string());
                fields.condition_value = branch.condition.value.clone();
                fields.true_next_step = branch.true_next_step;
                fields.false_next_step = branch.false_next_step;
            }
            Self::Action(action) => {
                fields.action_type = Some(action.action_type().as_str().to_string());
                fields.action_config = Some(action.config());
            }
        }
        fields
    }
}

/// Flat, nullable step columns
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepFields {
    #[serde(default)]
    pub email_subject: Option<String>,
    #[serde(default)]
    pub email_body: Option<String>,
    #[serde(default)]
    pub delay_value: Option<i32>,
    #[serde(default)]
    pub delay_unit: Option<String>,
    #[serde(default)]
    pub condition_field: Option<String>,
    #[serde(default)]
    pub condition_operator: Option<String>,
    #[serde(default)]
    pub condition_value: Option<String>,
    #[serde(default)]
    pub true_next_step: Option<i32>,
    #[serde(default)]
    pub false_next_step: Option<i32>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub action_config: Option<Value>,
}

impl StepFields {
    /// Kinds that have at least one column set
    pub fn populated_kinds(&self) -> Vec<StepKind> {
        let mut kinds = Vec::new();
        if self.email_subject.is_some() || self.email_body.is_some() {
            kinds.push(StepKind::Email);
        }
        if self.delay_value.is_some() || self.delay_unit.is_some() {
            kinds.push(StepKind::Delay);
        }
        if self.condition_field.is_some()
            || self.condition_operator.is_some()
            || self.condition_value.is_some()
            || self.true_next_step.is_some()
            || self.false_next_step.is_some()
        {
            kinds.push(StepKind::Condition);
        }
        if self.action_type.is_some() || self.action_config.is_some() {
            kinds.push(StepKind::Action);
        }
        kinds
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub payload: StepPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn new(workflow_id: Uuid, step_order: i32, name: &str, payload: StepPayload) -> Self {
        let name = if name.trim().is_empty() {
            payload.kind().default_name().to_string()
        } else {
            name.trim().to_string()
        };
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            step_order,
            name,
            payload,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn kind(&self) -> StepKind {
        self.payload.kind()
    }

    pub fn branch(&self) -> Option<&BranchCondition> {
        match &self.payload {
            StepPayload::Condition(branch) => Some(branch),
            _ => None,
        }
    }

    pub fn branch_mut(&mut self) -> Option<&mut BranchCondition> {
        match &mut self.payload {
            StepPayload::Condition(branch) => Some(branch),
            _ => None,
        }
    }

    pub fn to_record(&self) -> StepRecord {
        StepRecord {
            id: self.id,
            workflow_id: self.workflow_id,
            step_order: self.step_order,
            name: self.name.clone(),
            step_type: self.kind(),
            fields: self.payload.to_fields(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Step as returned by the API, in the flat persisted shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub step_type: StepKind,
    #[serde(flatten)]
    pub fields: StepFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Create/update body for a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    #[serde(default)]
    pub name: String,
    pub step_type: String,
    #[serde(flatten)]
    pub fields: StepFields,
}

impl StepInput {
    pub fn payload(&self) -> ApiResult<StepPayload> {
        StepPayload::from_fields(&self.step_type, &self.fields)
    }
}
