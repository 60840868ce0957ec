// Automation Conditions - field/operator/value matching shared by segment rules,
// workflow condition steps and entity automation rules

use leadflow_shared::{Lead, Subscriber};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationBuilder;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Closed set of comparison operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    // String operations (case-insensitive)
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,

    // Numeric comparisons
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,

    // Presence checks
    Exists,
    NotExists,
}

impl ConditionOperator {
    pub const ALL: [ConditionOperator; 12] = [
        Self::Contains,
        Self::NotContains,
        Self::Equals,
        Self::NotEquals,
        Self::StartsWith,
        Self::EndsWith,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterEqual,
        Self::LessEqual,
        Self::Exists,
        Self::NotExists,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterEqual => "greater_equal",
            Self::LessEqual => "less_equal",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        }
    }

    /// Operators usable in segment rules
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::NotContains
                | Self::Equals
                | Self::NotEquals
                | Self::StartsWith
                | Self::EndsWith
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::LessThan | Self::GreaterEqual | Self::LessEqual
        )
    }

    /// `exists` / `not_exists` never look at the comparison value
    pub fn ignores_value(&self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionOperator {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s.trim())
            .ok_or_else(|| ConditionError::UnknownOperator(s.to_string()))
    }
}

/// Record attributes a condition can test
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Email,
    Name,
    Source,
    Status,
    Company,
    EngagementLevel,
    LeadScore,
    Tags,
}

impl ConditionField {
    pub const ALL: [ConditionField; 8] = [
        Self::Email,
        Self::Name,
        Self::Source,
        Self::Status,
        Self::Company,
        Self::EngagementLevel,
        Self::LeadScore,
        Self::Tags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Name => "name",
            Self::Source => "source",
            Self::Status => "status",
            Self::Company => "company",
            Self::EngagementLevel => "engagement_level",
            Self::LeadScore => "lead_score",
            Self::Tags => "tags",
        }
    }

    /// Fields a segment rule may target
    pub fn is_segment_field(&self) -> bool {
        matches!(self, Self::Email | Self::Name | Self::Source)
    }
}

impl fmt::Display for ConditionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionField {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s.trim())
            .ok_or_else(|| ConditionError::UnknownField(s.to_string()))
    }
}

/// A field value as resolved from a subscriber, lead or event payload
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Text(String),
    Number(f64),
    List(Vec<String>),
}

impl FieldValue {
    /// Present means non-null and non-empty
    pub fn is_present(&self) -> bool {
        match self {
            Self::Missing => false,
            Self::Text(s) => !s.trim().is_empty(),
            Self::Number(n) => n.is_finite(),
            Self::List(items) => items.iter().any(|i| !i.trim().is_empty()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n).filter(|n| n.is_finite()),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Self::Missing | Self::List(_) => None,
        }
    }

    fn as_lower_text(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Text(s) => s.to_lowercase(),
            Self::Number(n) => n.to_string(),
            Self::List(items) => items.join(",").to_lowercase(),
        }
    }
}

impl From<Option<&str>> for FieldValue {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(s) => Self::Text(s.to_string()),
            None => Self::Missing,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&[String]> for FieldValue {
    fn from(value: &[String]) -> Self {
        Self::List(value.to_vec())
    }
}

/// Evaluate one comparison. Pure and total over [`ConditionOperator`].
///
/// String operators compare case-insensitively; a missing value compares as
/// the empty string. Numeric operators coerce both sides and treat anything
/// non-numeric as a non-match. For list values (tags) the string operators
/// test the individual entries.
pub fn evaluate(value: &FieldValue, operator: ConditionOperator, expected: &str) -> bool {
    use ConditionOperator::*;

    match operator {
        Exists => value.is_present(),
        NotExists => !value.is_present(),
        GreaterThan | LessThan | GreaterEqual | LessEqual => {
            let (Some(lhs), Ok(rhs)) = (value.as_number(), expected.trim().parse::<f64>()) else {
                return false;
            };
            if !rhs.is_finite() {
                return false;
            }
            match operator {
                GreaterThan => lhs > rhs,
                LessThan => lhs < rhs,
                GreaterEqual => lhs >= rhs,
                _ => lhs <= rhs,
            }
        }
        Contains | Equals | StartsWith | EndsWith => text_match(value, operator, expected),
        NotContains => !text_match(value, Contains, expected),
        NotEquals => !text_match(value, Equals, expected),
    }
}

fn text_match(value: &FieldValue, operator: ConditionOperator, expected: &str) -> bool {
    let needle = expected.to_lowercase();
    let test = |hay: &str| match operator {
        ConditionOperator::Contains => hay.contains(&needle),
        ConditionOperator::Equals => hay == needle,
        ConditionOperator::StartsWith => hay.starts_with(&needle),
        ConditionOperator::EndsWith => hay.ends_with(&needle),
        _ => false,
    };

    match value {
        FieldValue::List(items) => items.iter().any(|item| test(&item.to_lowercase())),
        other => test(&other.as_lower_text()),
    }
}

/// String-typed entry point for configuration that has not been parsed yet.
/// An operator outside the closed set is reported, never treated as a non-match.
pub fn evaluate_str(
    value: Option<&str>,
    operator: &str,
    expected: &str,
) -> Result<bool, ConditionError> {
    let operator: ConditionOperator = operator.parse()?;
    Ok(evaluate(&FieldValue::from(value), operator, expected))
}

/// Anything a condition can be evaluated against
pub trait RecordFields {
    fn field(&self, field: ConditionField) -> FieldValue;
}

impl RecordFields for Subscriber {
    fn field(&self, field: ConditionField) -> FieldValue {
        match field {
            ConditionField::Email => FieldValue::from(self.email.as_str()),
            ConditionField::Name => FieldValue::from(self.name.as_deref()),
            ConditionField::Source => FieldValue::from(self.source.as_deref()),
            ConditionField::Status => FieldValue::from(self.status.as_str()),
            ConditionField::Company => FieldValue::from(self.company.as_deref()),
            ConditionField::EngagementLevel => FieldValue::from(self.engagement_level.as_deref()),
            ConditionField::LeadScore => FieldValue::from(self.lead_score),
            ConditionField::Tags => FieldValue::from(self.tags.as_slice()),
        }
    }
}

impl RecordFields for Lead {
    fn field(&self, field: ConditionField) -> FieldValue {
        match field {
            ConditionField::Email => FieldValue::from(self.email.as_str()),
            ConditionField::Name => FieldValue::from(self.name.as_str()),
            ConditionField::Source => FieldValue::from(self.source.as_deref()),
            ConditionField::Status => FieldValue::from(self.status.as_str()),
            ConditionField::Company => FieldValue::from(self.company.as_deref()),
            ConditionField::EngagementLevel => FieldValue::from(self.engagement_level.as_deref()),
            ConditionField::LeadScore => FieldValue::from(self.lead_score),
            ConditionField::Tags => FieldValue::from(self.tags.as_slice()),
        }
    }
}

/// Event payloads carry the record as a JSON object keyed by field name
impl RecordFields for serde_json::Value {
    fn field(&self, field: ConditionField) -> FieldValue {
        match self.get(field.as_str()) {
            None | Some(serde_json::Value::Null) => FieldValue::Missing,
            Some(serde_json::Value::String(s)) => FieldValue::Text(s.clone()),
            Some(serde_json::Value::Number(n)) => {
                n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Missing)
            }
            Some(serde_json::Value::Bool(b)) => FieldValue::Text(b.to_string()),
            Some(serde_json::Value::Array(items)) => FieldValue::List(
                items
                    .iter()
                    .filter_map(|i| match i {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(other) => FieldValue::Text(other.to_string()),
        }
    }
}

/// A single field/operator/value test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<String>,
}

impl Condition {
    pub fn new(field: ConditionField, operator: ConditionOperator, value: Option<&str>) -> Self {
        Self {
            field,
            operator,
            value: value.map(str::to_string),
        }
    }

    pub fn equals(field: ConditionField, value: &str) -> Self {
        Self::new(field, ConditionOperator::Equals, Some(value))
    }

    pub fn contains(field: ConditionField, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Some(value))
    }

    pub fn greater_than(field: ConditionField, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, Some(&value.to_string()))
    }

    pub fn exists(field: ConditionField) -> Self {
        Self::new(field, ConditionOperator::Exists, None)
    }

    pub fn matches(&self, record: &(impl RecordFields + ?Sized)) -> bool {
        evaluate(
            &record.field(self.field),
            self.operator,
            self.value.as_deref().unwrap_or_default(),
        )
    }

    /// Record problems under `prefix.field` style keys
    pub fn validate_into(&self, prefix: &str, errors: &mut ValidationBuilder) {
        if self.operator.ignores_value() {
            return;
        }
        let key = format!("{}value", prefix);
        match self.value.as_deref().map(str::trim) {
            None | Some("") => errors.push(
                &key,
                &format!("A value is required for operator '{}'", self.operator),
            ),
            Some(v) if self.operator.is_numeric() && v.parse::<f64>().map_or(true, |n| !n.is_finite()) => {
                errors.push(&key, &format!("'{}' needs a numeric value", self.operator))
            }
            Some(_) => {}
        }
    }
}

/// AND-combination; an empty list always matches
pub fn all_match(conditions: &[Condition], record: &(impl RecordFields + ?Sized)) -> bool {
    conditions.iter().all(|c| c.matches(record))
}

/// Frequently used conditions
pub mod presets {
    use super::*;

    pub fn hot_leads() -> Condition {
        Condition::equals(ConditionField::EngagementLevel, "hot")
    }

    pub fn score_above(threshold: i32) -> Condition {
        Condition::greater_than(ConditionField::LeadScore, threshold as f64)
    }

    pub fn tagged(tag: &str) -> Condition {
        Condition::contains(ConditionField::Tags, tag)
    }

    pub fn email_domain(domain: &str) -> Condition {
        Condition::new(ConditionField::Email, ConditionOperator::EndsWith, Some(domain))
    }
}
