// Postgres store
//
// Step payloads live in flat nullable columns; rows are turned back into the
// payload sum type on load and anything that does not decode cleanly is
// reported as corrupt instead of being guessed at.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_shared::{Segment, SegmentMembership, Subscriber};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

use super::{RuleStore, SegmentStore, SettingsStore, StoreError, StoreResult, WorkflowStore};
use crate::automation::steps::StepFields;
use crate::automation::{
    AutomationRule, Condition, RuleAction, SegmentRule, StepPayload, Workflow, WorkflowStep,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SegmentRuleRow {
    id: Uuid,
    segment_id: Uuid,
    name: String,
    field: String,
    operator: String,
    value: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<SegmentRuleRow> for SegmentRule {
    type Error = StoreError;

    fn try_from(row: SegmentRuleRow) -> Result<Self, Self::Error> {
        let corrupt = |e: crate::automation::ConditionError| {
            StoreError::Corrupt(format!("segment rule {}: {}", row.id, e))
        };
        Ok(SegmentRule {
            id: row.id,
            segment_id: row.segment_id,
            field: row.field.parse().map_err(corrupt)?,
            operator: row.operator.parse().map_err(corrupt)?,
            name: row.name,
            value: row.value,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    trigger_type: String,
    trigger_value: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = StoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Workflow {
            trigger_type: row
                .trigger_type
                .parse()
                .map_err(|e: String| StoreError::Corrupt(format!("workflow {}: {}", row.id, e)))?,
            id: row.id,
            name: row.name,
            description: row.description,
            trigger_value: row.trigger_value,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StepRow {
    id: Uuid,
    workflow_id: Uuid,
    step_order: i32,
    name: String,
    step_type: String,
    email_subject: Option<String>,
    email_body: Option<String>,
    delay_value: Option<i32>,
    delay_unit: Option<String>,
    condition_field: Option<String>,
    condition_operator: Option<String>,
    condition_value: Option<String>,
    true_next_step: Option<i32>,
    false_next_step: Option<i32>,
    action_type: Option<String>,
    action_config: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<StepRow> for WorkflowStep {
    type Error = StoreError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        let fields = StepFields {
            email_subject: row.email_subject,
            email_body: row.email_body,
            delay_value: row.delay_value,
            delay_unit: row.delay_unit,
            condition_field: row.condition_field,
            condition_operator: row.condition_operator,
            condition_value: row.condition_value,
            true_next_step: row.true_next_step,
            false_next_step: row.false_next_step,
            action_type: row.action_type,
            action_config: row.action_config,
        };

        let populated = fields.populated_kinds();
        if populated.len() != 1 || populated[0].as_str() != row.step_type {
            return Err(StoreError::Corrupt(format!(
                "step {} is '{}' but has payload columns for {:?}",
                row.id, row.step_type, populated
            )));
        }
        let payload = StepPayload::from_fields(&row.step_type, &fields)
            .map_err(|e| StoreError::Corrupt(format!("step {}: {}", row.id, e)))?;

        Ok(WorkflowStep {
            id: row.id,
            workflow_id: row.workflow_id,
            step_order: row.step_order,
            name: row.name,
            payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AutomationRuleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    trigger_entity: String,
    trigger_event: String,
    conditions: serde_json::Value,
    actions: serde_json::Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<AutomationRuleRow> for AutomationRule {
    type Error = StoreError;

    fn try_from(row: AutomationRuleRow) -> Result<Self, Self::Error> {
        let corrupt = |e: String| StoreError::Corrupt(format!("automation rule {}: {}", row.id, e));
        let conditions: Vec<Condition> = serde_json::from_value(row.conditions)?;
        let actions: Vec<RuleAction> = serde_json::from_value(row.actions)?;
        Ok(AutomationRule {
            trigger_entity: row.trigger_entity.parse().map_err(corrupt)?,
            trigger_event: row.trigger_event.parse().map_err(corrupt)?,
            id: row.id,
            name: row.name,
            description: row.description,
            conditions,
            actions,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const STEP_COLUMNS: &str = r#"
    id, workflow_id, step_order, name, step_type,
    email_subject, email_body, delay_value, delay_unit,
    condition_field, condition_operator, condition_value, true_next_step, false_next_step,
    action_type, action_config, created_at, updated_at
"#;

/// Unique violations become `Conflict`; anything else stays a database error
fn unique_conflict(err: sqlx::Error) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
        _ => StoreError::Database(err),
    }
}

async fn insert_step_tx(tx: &mut Transaction<'_, Postgres>, step: &WorkflowStep) -> StoreResult<()> {
    let record = step.to_record();
    let f = &record.fields;
    sqlx::query(
        r#"
        INSERT INTO workflow_steps (
            id, workflow_id, step_order, name, step_type,
            email_subject, email_body, delay_value, delay_unit,
            condition_field, condition_operator, condition_value, true_next_step, false_next_step,
            action_type, action_config, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(record.id)
    .bind(record.workflow_id)
    .bind(record.step_order)
    .bind(&record.name)
    .bind(record.step_type.as_str())
    .bind(&f.email_subject)
    .bind(&f.email_body)
    .bind(f.delay_value)
    .bind(&f.delay_unit)
    .bind(&f.condition_field)
    .bind(&f.condition_operator)
    .bind(&f.condition_value)
    .bind(f.true_next_step)
    .bind(f.false_next_step)
    .bind(&f.action_type)
    .bind(&f.action_config)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Rewrites every payload column so a kind switch clears the old kind's fields
async fn update_step_tx(tx: &mut Transaction<'_, Postgres>, step: &WorkflowStep) -> StoreResult<()> {
    let record = step.to_record();
    let f = &record.fields;
    let result = sqlx::query(
        r#"
        UPDATE workflow_steps SET
            step_order = $3, name = $4, step_type = $5,
            email_subject = $6, email_body = $7, delay_value = $8, delay_unit = $9,
            condition_field = $10, condition_operator = $11, condition_value = $12,
            true_next_step = $13, false_next_step = $14,
            action_type = $15, action_config = $16, updated_at = $17
        WHERE id = $1 AND workflow_id = $2
        "#,
    )
    .bind(record.id)
    .bind(record.workflow_id)
    .bind(record.step_order)
    .bind(&record.name)
    .bind(record.step_type.as_str())
    .bind(&f.email_subject)
    .bind(&f.email_body)
    .bind(f.delay_value)
    .bind(&f.delay_unit)
    .bind(&f.condition_field)
    .bind(&f.condition_operator)
    .bind(&f.condition_value)
    .bind(f.true_next_step)
    .bind(f.false_next_step)
    .bind(&f.action_type)
    .bind(&f.action_config)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("Workflow step".to_string()));
    }
    Ok(())
}

#[async_trait]
impl SegmentStore for PgStore {
    async fn list_segments(&self) -> StoreResult<Vec<Segment>> {
        let segments = sqlx::query_as::<_, Segment>(
            "SELECT id, name, description, created_at FROM segments ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(segments)
    }

    async fn get_segment(&self, id: Uuid) -> StoreResult<Option<Segment>> {
        let segment = sqlx::query_as::<_, Segment>(
            "SELECT id, name, description, created_at FROM segments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(segment)
    }

    async fn list_segment_rules(&self) -> StoreResult<Vec<SegmentRule>> {
        let rows = sqlx::query_as::<_, SegmentRuleRow>(
            r#"
            SELECT id, segment_id, name, field, operator, value, is_active, created_at, updated_at
            FROM segment_rules
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SegmentRule::try_from).collect()
    }

    async fn get_segment_rule(&self, id: Uuid) -> StoreResult<Option<SegmentRule>> {
        let row = sqlx::query_as::<_, SegmentRuleRow>(
            r#"
            SELECT id, segment_id, name, field, operator, value, is_active, created_at, updated_at
            FROM segment_rules
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SegmentRule::try_from).transpose()
    }

    async fn save_segment_rule(&self, rule: &SegmentRule) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO segment_rules (id, segment_id, name, field, operator, value, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                segment_id = EXCLUDED.segment_id,
                name = EXCLUDED.name,
                field = EXCLUDED.field,
                operator = EXCLUDED.operator,
                value = EXCLUDED.value,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(rule.id)
        .bind(rule.segment_id)
        .bind(&rule.name)
        .bind(rule.field.as_str())
        .bind(rule.operator.as_str())
        .bind(&rule.value)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_segment_rule(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM segment_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscribers(&self) -> StoreResult<Vec<Subscriber>> {
        let subscribers = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT id, email, name, source, status, engagement_level, lead_score, tags, company, created_at
            FROM subscribers
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscribers)
    }

    async fn get_subscriber(&self, id: Uuid) -> StoreResult<Option<Subscriber>> {
        let subscriber = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT id, email, name, source, status, engagement_level, lead_score, tags, company, created_at
            FROM subscribers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscriber)
    }

    async fn upsert_membership(&self, subscriber_id: Uuid, segment_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO segment_members (subscriber_id, segment_id, added_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (subscriber_id, segment_id) DO NOTHING
            "#,
        )
        .bind(subscriber_id)
        .bind(segment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_members(&self, segment_id: Uuid) -> StoreResult<Vec<SegmentMembership>> {
        let members = sqlx::query_as::<_, SegmentMembership>(
            r#"
            SELECT subscriber_id, segment_id, added_at
            FROM segment_members
            WHERE segment_id = $1
            ORDER BY added_at
            "#,
        )
        .bind(segment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, name, description, trigger_type, trigger_value, is_active, created_at, updated_at
            FROM workflows
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Workflow::try_from).collect()
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, name, description, trigger_type, trigger_value, is_active, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Workflow::try_from).transpose()
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, description, trigger_type, trigger_value, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.trigger_type.as_str())
        .bind(&workflow.trigger_value)
        .bind(workflow.is_active)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, trigger_type = $4, trigger_value = $5,
                is_active = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.trigger_type.as_str())
        .bind(&workflow.trigger_value)
        .bind(workflow.is_active)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Workflow".to_string()));
        }
        Ok(())
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_workflow_with_steps(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, description, trigger_type, trigger_value, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.trigger_type.as_str())
        .bind(&workflow.trigger_value)
        .bind(workflow.is_active)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await?;

        for step in steps {
            insert_step_tx(&mut tx, step).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_steps(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowStep>> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM workflow_steps WHERE workflow_id = $1 ORDER BY step_order",
            STEP_COLUMNS
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                WorkflowStep::try_from(row).inspect_err(|e| error!("Unreadable workflow step: {}", e))
            })
            .collect()
    }

    async fn insert_step(&self, step: &WorkflowStep) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_step_tx(&mut tx, step).await?;
        // the deferred order constraint is checked here
        tx.commit().await.map_err(unique_conflict)?;
        Ok(())
    }

    async fn update_step(&self, step: &WorkflowStep) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        update_step_tx(&mut tx, step).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_step(
        &self,
        workflow_id: Uuid,
        step_id: Uuid,
        cleared: &[WorkflowStep],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM workflow_steps WHERE id = $1 AND workflow_id = $2")
            .bind(step_id)
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Workflow step".to_string()));
        }
        for step in cleared {
            update_step_tx(&mut tx, step).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_step_orders(&self, workflow_id: Uuid, steps: &[WorkflowStep]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for step in steps {
            let (true_next, false_next) = match step.branch() {
                Some(branch) => (branch.true_next_step, branch.false_next_step),
                None => (None, None),
            };
            let result = sqlx::query(
                r#"
                UPDATE workflow_steps
                SET step_order = $3, true_next_step = $4, false_next_step = $5, updated_at = NOW()
                WHERE id = $1 AND workflow_id = $2
                "#,
            )
            .bind(step.id)
            .bind(workflow_id)
            .bind(step.step_order)
            .bind(true_next)
            .bind(false_next)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound("Workflow step".to_string()));
            }
        }
        // the deferred order constraint is checked here
        tx.commit().await?;
        debug!("Wrote order of {} steps for workflow {}", steps.len(), workflow_id);
        Ok(())
    }
}

#[async_trait]
impl RuleStore for PgStore {
    async fn list_automation_rules(&self) -> StoreResult<Vec<AutomationRule>> {
        let rows = sqlx::query_as::<_, AutomationRuleRow>(
            r#"
            SELECT id, name, description, trigger_entity, trigger_event, conditions, actions,
                   is_active, created_at, updated_at
            FROM automation_rules
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AutomationRule::try_from).collect()
    }

    async fn get_automation_rule(&self, id: Uuid) -> StoreResult<Option<AutomationRule>> {
        let row = sqlx::query_as::<_, AutomationRuleRow>(
            r#"
            SELECT id, name, description, trigger_entity, trigger_event, conditions, actions,
                   is_active, created_at, updated_at
            FROM automation_rules
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AutomationRule::try_from).transpose()
    }

    async fn save_automation_rule(&self, rule: &AutomationRule) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_rules (
                id, name, description, trigger_entity, trigger_event, conditions, actions,
                is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                trigger_entity = EXCLUDED.trigger_entity,
                trigger_event = EXCLUDED.trigger_event,
                conditions = EXCLUDED.conditions,
                actions = EXCLUDED.actions,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.trigger_entity.as_str())
        .bind(rule.trigger_event.as_str())
        .bind(serde_json::to_value(&rule.conditions)?)
        .bind(serde_json::to_value(&rule.actions)?)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_automation_rule(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn load_settings(&self) -> StoreResult<Option<serde_json::Value>> {
        let document = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT document FROM site_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(document)
    }

    async fn save_settings(&self, document: &serde_json::Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO site_settings (id, document, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document, updated_at = NOW()
            "#,
        )
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
