// Segment Automation - static "field operator value -> segment" rules and the
// batch backfill that applies them to existing subscribers

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use leadflow_shared::Subscriber;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::conditions::{evaluate, ConditionField, ConditionOperator, RecordFields};
use super::triggers::TriggerEvent;
use crate::error::{ApiResult, ValidationBuilder};
use crate::store::{SegmentStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentRule {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub name: String,
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SegmentRule {
    pub fn matches(&self, subscriber: &Subscriber) -> bool {
        evaluate(&subscriber.field(self.field), self.operator, &self.value)
    }
}

/// Create/update body for a segment rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRuleInput {
    pub segment_id: Uuid,
    pub name: String,
    pub field: String,
    pub operator: String,
    pub value: String,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl SegmentRuleInput {
    /// Validate and produce a rule; `existing` keeps id and timestamps on update
    pub fn into_rule(self, existing: Option<&SegmentRule>) -> ApiResult<SegmentRule> {
        let mut errors = ValidationBuilder::new();

        if self.name.trim().is_empty() {
            errors.push("name", "Rule name is required");
        }

        let field = match self.field.parse::<ConditionField>() {
            Ok(f) if f.is_segment_field() => Some(f),
            Ok(f) => {
                errors.push("field", &format!("Segment rules cannot use '{}'", f));
                None
            }
            Err(e) => {
                errors.push("field", &e.to_string());
                None
            }
        };

        let operator = match self.operator.parse::<ConditionOperator>() {
            Ok(op) if op.is_text() => Some(op),
            Ok(op) => {
                errors.push("operator", &format!("Segment rules cannot use '{}'", op));
                None
            }
            Err(e) => {
                errors.push("operator", &e.to_string());
                None
            }
        };

        if self.value.trim().is_empty() {
            errors.push("value", "Comparison value is required");
        }

        errors.finish()?;

        let (Some(field), Some(operator)) = (field, operator) else {
            return Err(crate::error::validation_error("field", "Invalid rule"));
        };

        Ok(SegmentRule {
            id: existing.map(|r| r.id).unwrap_or_else(Uuid::new_v4),
            segment_id: self.segment_id,
            name: self.name.trim().to_string(),
            field,
            operator,
            value: self.value.trim().to_string(),
            is_active: self
                .is_active
                .unwrap_or_else(|| existing.map(|r| r.is_active).unwrap_or(true)),
            created_at: existing.map(|r| r.created_at).unwrap_or_else(Utc::now),
            updated_at: existing.map(|_| Utc::now()),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    Added,
    AlreadyMember,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairFailure {
    pub rule_id: Uuid,
    pub subscriber_id: Uuid,
    pub segment_id: Uuid,
    pub error: String,
}

/// Aggregate result of a backfill run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub rules_applied: usize,
    pub subscribers_scanned: usize,
    pub subscribers_skipped: usize,
    pub pairs_matched: usize,
    pub added_count: usize,
    pub already_member: usize,
    pub failed: Vec<PairFailure>,
    pub new_memberships: Vec<(Uuid, Uuid)>,
}

impl BatchReport {
    /// `segment_joined` events for the memberships this run created
    pub fn joined_events(&self) -> Vec<TriggerEvent> {
        self.new_memberships
            .iter()
            .map(|(subscriber_id, segment_id)| TriggerEvent::segment_joined(*subscriber_id, *segment_id))
            .collect()
    }
}

pub struct SegmentAssigner<S: SegmentStore + ?Sized> {
    store: Arc<S>,
    concurrency: usize,
}

impl<S: SegmentStore + ?Sized> SegmentAssigner<S> {
    pub fn new(store: Arc<S>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Idempotent upsert of one membership; an existing pair is success
    pub async fn assign(
        &self,
        subscriber_id: Uuid,
        segment_id: Uuid,
    ) -> Result<AssignOutcome, StoreError> {
        let inserted = self.store.upsert_membership(subscriber_id, segment_id).await?;
        Ok(if inserted {
            AssignOutcome::Added
        } else {
            AssignOutcome::AlreadyMember
        })
    }

    /// Evaluate every active rule against every active subscriber and assign
    /// the matches. A failed pair is recorded and the run continues.
    pub async fn apply_rules_to_all(
        &self,
        rules: &[SegmentRule],
        subscribers: &[Subscriber],
    ) -> BatchReport {
        let active_rules: Vec<&SegmentRule> = rules.iter().filter(|r| r.is_active).collect();
        let mut report = BatchReport {
            rules_applied: active_rules.len(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for subscriber in subscribers {
            if !subscriber.is_active() {
                report.subscribers_skipped += 1;
                continue;
            }
            report.subscribers_scanned += 1;
            for rule in &active_rules {
                if rule.matches(subscriber) && seen.insert((subscriber.id, rule.segment_id)) {
                    pairs.push((rule.id, subscriber.id, rule.segment_id));
                }
            }
        }
        report.pairs_matched = pairs.len();
        debug!("Segment backfill: {} matching pairs", pairs.len());

        let results: Vec<_> = stream::iter(pairs)
            .map(|(rule_id, subscriber_id, segment_id)| async move {
                let outcome = self.assign(subscriber_id, segment_id).await;
                (rule_id, subscriber_id, segment_id, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (rule_id, subscriber_id, segment_id, outcome) in results {
            match outcome {
                Ok(AssignOutcome::Added) => {
                    report.added_count += 1;
                    report.new_memberships.push((subscriber_id, segment_id));
                }
                Ok(AssignOutcome::AlreadyMember) => report.already_member += 1,
                Err(e) => {
                    warn!(
                        "Failed to add subscriber {} to segment {} (rule {}): {}",
                        subscriber_id, segment_id, rule_id, e
                    );
                    report.failed.push(PairFailure {
                        rule_id,
                        subscriber_id,
                        segment_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.new_memberships.sort();
        info!(
            "Segment backfill finished: {} added, {} already members, {} failed",
            report.added_count,
            report.already_member,
            report.failed.len()
        );
        report
    }

    /// Backfill using the stored rules and subscribers
    pub async fn apply_stored(&self) -> ApiResult<BatchReport> {
        let rules = self.store.list_segment_rules().await?;
        let subscribers = self.store.list_subscribers().await?;
        Ok(self.apply_rules_to_all(&rules, &subscribers).await)
    }
}
