// In-memory store with the same semantics as the Postgres store

use async_trait::async_trait;
use chrono::Utc;
use leadflow_shared::{Segment, SegmentMembership, Subscriber};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RuleStore, SegmentStore, SettingsStore, StoreError, StoreResult, WorkflowStore};
use crate::automation::{AutomationRule, SegmentRule, Workflow, WorkflowStep};

#[derive(Default)]
pub struct MemoryStore {
    segments: RwLock<HashMap<Uuid, Segment>>,
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    segment_rules: RwLock<HashMap<Uuid, SegmentRule>>,
    memberships: RwLock<Vec<SegmentMembership>>,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    steps: RwLock<HashMap<Uuid, Vec<WorkflowStep>>>,
    automation_rules: RwLock<HashMap<Uuid, AutomationRule>>,
    settings: RwLock<Option<serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers come from the subscriber provider; this seeds them directly
    pub async fn insert_subscriber(&self, subscriber: Subscriber) {
        self.subscribers
            .write()
            .await
            .insert(subscriber.id, subscriber);
    }

    pub async fn insert_segment(&self, name: &str) -> Segment {
        let segment = Segment {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            created_at: Utc::now(),
        };
        self.segments
            .write()
            .await
            .insert(segment.id, segment.clone());
        segment
    }
}

fn sorted(mut steps: Vec<WorkflowStep>) -> Vec<WorkflowStep> {
    steps.sort_by_key(|s| s.step_order);
    steps
}

/// Orders must stay unique within a workflow after a write
fn check_orders(steps: &[WorkflowStep]) -> StoreResult<()> {
    let mut orders: Vec<i32> = steps.iter().map(|s| s.step_order).collect();
    orders.sort_unstable();
    if orders.windows(2).any(|w| w[0] == w[1]) {
        return Err(StoreError::Corrupt("duplicate step order".to_string()));
    }
    Ok(())
}

#[async_trait]
impl SegmentStore for MemoryStore {
    async fn list_segments(&self) -> StoreResult<Vec<Segment>> {
        let mut segments: Vec<Segment> = self.segments.read().await.values().cloned().collect();
        segments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(segments)
    }

    async fn get_segment(&self, id: Uuid) -> StoreResult<Option<Segment>> {
        Ok(self.segments.read().await.get(&id).cloned())
    }

    async fn list_segment_rules(&self) -> StoreResult<Vec<SegmentRule>> {
        let mut rules: Vec<SegmentRule> = self.segment_rules.read().await.values().cloned().collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn get_segment_rule(&self, id: Uuid) -> StoreResult<Option<SegmentRule>> {
        Ok(self.segment_rules.read().await.get(&id).cloned())
    }

    async fn save_segment_rule(&self, rule: &SegmentRule) -> StoreResult<()> {
        self.segment_rules.write().await.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_segment_rule(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.segment_rules.write().await.remove(&id).is_some())
    }

    async fn list_subscribers(&self) -> StoreResult<Vec<Subscriber>> {
        let mut subscribers: Vec<Subscriber> =
            self.subscribers.read().await.values().cloned().collect();
        subscribers.sort_by_key(|s| s.created_at);
        Ok(subscribers)
    }

    async fn get_subscriber(&self, id: Uuid) -> StoreResult<Option<Subscriber>> {
        Ok(self.subscribers.read().await.get(&id).cloned())
    }

    async fn upsert_membership(&self, subscriber_id: Uuid, segment_id: Uuid) -> StoreResult<bool> {
        let mut memberships = self.memberships.write().await;
        if memberships
            .iter()
            .any(|m| m.subscriber_id == subscriber_id && m.segment_id == segment_id)
        {
            return Ok(false);
        }
        memberships.push(SegmentMembership {
            subscriber_id,
            segment_id,
            added_at: Utc::now(),
        });
        Ok(true)
    }

    async fn list_members(&self, segment_id: Uuid) -> StoreResult<Vec<SegmentMembership>> {
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .filter(|m| m.segment_id == segment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(workflows)
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        match self.workflows.write().await.get_mut(&workflow.id) {
            Some(existing) => {
                *existing = workflow.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound("Workflow".to_string())),
        }
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<bool> {
        let removed = self.workflows.write().await.remove(&id).is_some();
        self.steps.write().await.remove(&id);
        Ok(removed)
    }

    async fn insert_workflow_with_steps(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> StoreResult<()> {
        check_orders(steps)?;
        let mut workflows = self.workflows.write().await;
        let mut all_steps = self.steps.write().await;
        workflows.insert(workflow.id, workflow.clone());
        all_steps.insert(workflow.id, sorted(steps.to_vec()));
        Ok(())
    }

    async fn list_steps(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowStep>> {
        let steps = self.steps.read().await;
        Ok(steps.get(&workflow_id).cloned().map(sorted).unwrap_or_default())
    }

    async fn insert_step(&self, step: &WorkflowStep) -> StoreResult<()> {
        if !self.workflows.read().await.contains_key(&step.workflow_id) {
            return Err(StoreError::NotFound("Workflow".to_string()));
        }
        let mut all_steps = self.steps.write().await;
        let steps = all_steps.entry(step.workflow_id).or_default();
        if steps.iter().any(|s| s.step_order == step.step_order) {
            return Err(StoreError::Conflict(format!(
                "step order {} already used",
                step.step_order
            )));
        }
        steps.push(step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &WorkflowStep) -> StoreResult<()> {
        let mut all_steps = self.steps.write().await;
        let existing = all_steps
            .get_mut(&step.workflow_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.id == step.id))
            .ok_or_else(|| StoreError::NotFound("Workflow step".to_string()))?;
        *existing = step.clone();
        Ok(())
    }

    async fn delete_step(
        &self,
        workflow_id: Uuid,
        step_id: Uuid,
        cleared: &[WorkflowStep],
    ) -> StoreResult<()> {
        let mut all_steps = self.steps.write().await;
        let steps = all_steps
            .get_mut(&workflow_id)
            .ok_or_else(|| StoreError::NotFound("Workflow step".to_string()))?;
        let before = steps.len();
        steps.retain(|s| s.id != step_id);
        if steps.len() == before {
            return Err(StoreError::NotFound("Workflow step".to_string()));
        }
        for updated in cleared {
            if let Some(existing) = steps.iter_mut().find(|s| s.id == updated.id) {
                *existing = updated.clone();
            }
        }
        Ok(())
    }

    async fn write_step_orders(&self, workflow_id: Uuid, steps: &[WorkflowStep]) -> StoreResult<()> {
        let mut all_steps = self.steps.write().await;
        let current = all_steps
            .get_mut(&workflow_id)
            .ok_or_else(|| StoreError::NotFound("Workflow".to_string()))?;

        let mut next = current.clone();
        for step in steps {
            let existing = next
                .iter_mut()
                .find(|s| s.id == step.id)
                .ok_or_else(|| StoreError::NotFound("Workflow step".to_string()))?;
            existing.step_order = step.step_order;
            existing.payload = step.payload.clone();
        }
        check_orders(&next)?;
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_automation_rules(&self) -> StoreResult<Vec<AutomationRule>> {
        let mut rules: Vec<AutomationRule> =
            self.automation_rules.read().await.values().cloned().collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn get_automation_rule(&self, id: Uuid) -> StoreResult<Option<AutomationRule>> {
        Ok(self.automation_rules.read().await.get(&id).cloned())
    }

    async fn save_automation_rule(&self, rule: &AutomationRule) -> StoreResult<()> {
        self.automation_rules
            .write()
            .await
            .insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_automation_rule(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.automation_rules.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load_settings(&self) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.settings.read().await.clone())
    }

    async fn save_settings(&self, document: &serde_json::Value) -> StoreResult<()> {
        *self.settings.write().await = Some(document.clone());
        Ok(())
    }
}
