// Workflow Automation - triggerable, ordered sequences of steps
//
// Definitions only. Delivery, scheduling and dispatch belong to the execution
// engine, which reads what this service stores.

use chrono::{DateTime, Duration, Utc};
use leadflow_shared::Subscriber;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::actions::ActionEffect;
use super::graph::{self, DanglingTarget, StepGraph};
use super::steps::{RenderedEmail, StepInput, StepKind, StepPayload, StepRecord, WorkflowStep};
use super::triggers::{EventPayload, TriggerEvent, TriggerType};
use crate::error::{validation_error, ApiError, ApiResult, AppError, ValidationBuilder};
use crate::store::{StoreError, WorkflowStore};

pub const NAME_MAX_LEN: usize = 120;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    /// Segment id for `on_segment_join`, hook key for `webhook`
    pub trigger_value: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Whether an active workflow starts for this event
    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        if !self.is_active {
            return false;
        }
        match (&self.trigger_type, &event.payload) {
            (TriggerType::Manual, EventPayload::Manual { workflow_id, .. }) => *workflow_id == self.id,
            (TriggerType::OnSubscribe, EventPayload::Subscribed { .. }) => true,
            (TriggerType::OnSegmentJoin, EventPayload::SegmentJoined { segment_id, .. }) => {
                match self.trigger_value.as_deref() {
                    Some(value) => value.parse::<Uuid>().is_ok_and(|id| id == *segment_id),
                    None => true,
                }
            }
            (TriggerType::Webhook, EventPayload::Webhook { hook_key, .. }) => {
                self.trigger_value.as_deref() == Some(hook_key.as_str())
            }
            _ => false,
        }
    }
}

fn new_hook_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Create/update body for workflow metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_value: Option<String>,
}

impl WorkflowInput {
    /// Validate into a workflow. New workflows are always inactive; updates keep
    /// the existing activation state.
    pub fn into_workflow(self, existing: Option<&Workflow>) -> ApiResult<Workflow> {
        let mut errors = ValidationBuilder::new();

        let name = self.name.trim().to_string();
        if name.is_empty() {
            errors.push("name", "Workflow name is required");
        } else if name.chars().count() > NAME_MAX_LEN {
            errors.push(
                "name",
                &format!("Workflow name must be {} characters or less", NAME_MAX_LEN),
            );
        }

        let trigger_type = match self.trigger_type.parse::<TriggerType>() {
            Ok(t) => Some(t),
            Err(msg) => {
                errors.push("trigger_type", &msg);
                None
            }
        };

        let value = self
            .trigger_value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let trigger_value = match trigger_type {
            Some(TriggerType::OnSegmentJoin) => match value {
                Some(v) if v.parse::<Uuid>().is_ok() => Some(v),
                Some(_) => {
                    errors.push("trigger_value", "Trigger value must be a segment id");
                    None
                }
                None => {
                    errors.push("trigger_value", "Choose the segment that starts this workflow");
                    None
                }
            },
            Some(TriggerType::Webhook) => value
                .or_else(|| existing.and_then(|w| w.trigger_value.clone()))
                .or_else(|| Some(new_hook_key())),
            _ => None,
        };

        errors.finish()?;
        let trigger_type = trigger_type.ok_or_else(|| validation_error("trigger_type", "required"))?;

        Ok(Workflow {
            id: existing.map(|w| w.id).unwrap_or_else(Uuid::new_v4),
            name,
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            trigger_type,
            trigger_value,
            is_active: existing.is_some_and(|w| w.is_active),
            created_at: existing.map(|w| w.created_at).unwrap_or_else(Utc::now),
            updated_at: existing.map(|_| Utc::now()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowWithSteps {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub steps: Vec<StepRecord>,
    /// Sum of the delay steps along the straight-line path
    pub total_delay_minutes: i64,
    pub dangling_targets: Vec<DanglingTarget>,
}

impl WorkflowWithSteps {
    fn new(workflow: Workflow, steps: &[WorkflowStep]) -> Self {
        let (total_delay_minutes, dangling_targets) = match StepGraph::new(steps) {
            Ok(graph) => (
                graph.linear_delay().map_or(i64::MAX, |d| d.num_minutes()),
                graph.dangling_targets(),
            ),
            Err(err) => {
                warn!(
                    "Steps of workflow {} do not form a valid sequence: {}",
                    workflow.id, err
                );
                (0, Vec::new())
            }
        };
        Self {
            workflow,
            steps: steps.iter().map(WorkflowStep::to_record).collect(),
            total_delay_minutes,
            dangling_targets,
        }
    }
}

/// Result of deleting a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDeletion {
    pub deleted: Uuid,
    /// Steps whose branch targets pointed at the deleted step and were cleared
    pub cleared_references: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewStep {
    pub step_id: Uuid,
    pub step_order: i32,
    pub name: String,
    pub step_type: StepKind,
    /// Time since the workflow started when this step runs
    pub offset_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<RenderedEmail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_taken: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<ActionEffect>,
}

/// Dry run of a workflow for one subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPreview {
    pub workflow_id: Uuid,
    pub subscriber_id: Uuid,
    pub path: Vec<PreviewStep>,
    pub total_delay_minutes: i64,
    /// Path was cut short because a branch loops
    pub truncated: bool,
    pub dangling_targets: Vec<DanglingTarget>,
}

pub struct WorkflowService<S: WorkflowStore + ?Sized> {
    store: Arc<S>,
    max_steps: usize,
}

impl<S: WorkflowStore + ?Sized> WorkflowService<S> {
    pub fn new(store: Arc<S>, max_steps: usize) -> Self {
        Self { store, max_steps }
    }

    async fn require_workflow(&self, id: Uuid) -> ApiResult<Workflow> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Workflow"))
    }

    pub async fn list(&self) -> ApiResult<Vec<Workflow>> {
        Ok(self.store.list_workflows().await?)
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<WorkflowWithSteps> {
        let workflow = self.require_workflow(id).await?;
        let steps = self.store.list_steps(id).await?;
        Ok(WorkflowWithSteps::new(workflow, &steps))
    }

    pub async fn create(&self, input: WorkflowInput) -> ApiResult<Workflow> {
        let workflow = input.into_workflow(None)?;
        self.store.insert_workflow(&workflow).await?;
        info!("Created workflow {} ({})", workflow.name, workflow.id);
        Ok(workflow)
    }

    pub async fn update(&self, id: Uuid, input: WorkflowInput) -> ApiResult<Workflow> {
        let existing = self.require_workflow(id).await?;
        let workflow = input.into_workflow(Some(&existing))?;
        self.store.update_workflow(&workflow).await?;
        Ok(workflow)
    }

    /// Removes the workflow and all of its steps
    pub async fn delete(&self, id: Uuid) -> ApiResult<()> {
        if !self.store.delete_workflow(id).await? {
            return Err(ApiError::not_found("Workflow"));
        }
        info!("Deleted workflow {}", id);
        Ok(())
    }

    /// Activation requires at least one step; deactivation always succeeds
    pub async fn set_active(&self, id: Uuid, active: bool) -> ApiResult<Workflow> {
        let mut workflow = self.require_workflow(id).await?;
        if active {
            let steps = self.store.list_steps(id).await?;
            if steps.is_empty() {
                return Err(validation_error(
                    "steps",
                    "Add at least one step before activating the workflow",
                ));
            }
            let dangling = StepGraph::new(&steps)?.dangling_targets();
            if !dangling.is_empty() {
                warn!(
                    "Activating workflow {} with {} dangling branch targets",
                    id,
                    dangling.len()
                );
            }
        }
        if workflow.is_active == active {
            return Ok(workflow);
        }

        workflow.is_active = active;
        workflow.updated_at = Some(Utc::now());
        self.store.update_workflow(&workflow).await?;
        info!(
            "Workflow {} {}",
            id,
            if active { "activated" } else { "deactivated" }
        );
        Ok(workflow)
    }

    pub async fn list_steps(&self, workflow_id: Uuid) -> ApiResult<Vec<WorkflowStep>> {
        self.require_workflow(workflow_id).await?;
        Ok(self.store.list_steps(workflow_id).await?)
    }

    /// Append a step after the current highest order
    pub async fn add_step(&self, workflow_id: Uuid, input: StepInput) -> ApiResult<WorkflowStep> {
        let payload = input.payload()?;
        self.require_workflow(workflow_id).await?;

        let steps = self.store.list_steps(workflow_id).await?;
        if steps.len() >= self.max_steps {
            return Err(validation_error(
                "steps",
                &format!("A workflow can have at most {} steps", self.max_steps),
            ));
        }
        let order = steps.iter().map(|s| s.step_order).max().unwrap_or(0) + 1;

        let step = WorkflowStep::new(workflow_id, order, &input.name, payload);
        match self.store.insert_step(&step).await {
            Ok(()) => Ok(step),
            Err(StoreError::Conflict(msg)) => {
                warn!("Concurrent step append on workflow {}: {}", workflow_id, msg);
                Err(validation_error(
                    "steps",
                    "Another step was added to this workflow at the same time; try again",
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replace a step's name and payload; switching kind drops the old payload
    pub async fn update_step(
        &self,
        workflow_id: Uuid,
        step_id: Uuid,
        input: StepInput,
    ) -> ApiResult<WorkflowStep> {
        let payload = input.payload()?;
        let steps = self.list_steps(workflow_id).await?;
        let existing = steps
            .into_iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| ApiError::not_found("Workflow step"))?;

        let mut step = WorkflowStep::new(workflow_id, existing.step_order, &input.name, payload);
        step.id = existing.id;
        step.created_at = existing.created_at;
        step.updated_at = Some(Utc::now());

        self.store.update_step(&step).await?;
        Ok(step)
    }

    /// Delete a step and clear branch targets that pointed at it, in one write
    pub async fn delete_step(&self, workflow_id: Uuid, step_id: Uuid) -> ApiResult<StepDeletion> {
        let workflow = self.require_workflow(workflow_id).await?;
        let steps = self.store.list_steps(workflow_id).await?;
        let step = steps
            .iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| ApiError::not_found("Workflow step"))?;

        if workflow.is_active && steps.len() == 1 {
            return Err(validation_error(
                "steps",
                "An active workflow must keep at least one step; deactivate it first",
            ));
        }

        let cleared = graph::clear_references(&steps, step.step_order)?;
        self.store.delete_step(workflow_id, step_id, &cleared).await?;

        if !cleared.is_empty() {
            info!(
                "Deleted step {} and cleared {} branch references",
                step_id,
                cleared.len()
            );
        }
        Ok(StepDeletion {
            deleted: step_id,
            cleared_references: cleared.iter().map(|s| s.id).collect(),
        })
    }

    /// Persist a new order for every step of the workflow. Either the whole
    /// renumbering lands or the previous order stands; when neither can be
    /// guaranteed the affected steps are reported.
    pub async fn reorder_steps(
        &self,
        workflow_id: Uuid,
        sequence: &[Uuid],
    ) -> ApiResult<Vec<WorkflowStep>> {
        self.require_workflow(workflow_id).await?;
        let previous = self.store.list_steps(workflow_id).await?;
        let renumbered = graph::renumber(&previous, sequence)?;

        if let Err(err) = self.store.write_step_orders(workflow_id, &renumbered).await {
            return Err(self.recover_reorder(workflow_id, &previous, err).await);
        }

        info!("Reordered {} steps of workflow {}", renumbered.len(), workflow_id);
        Ok(renumbered)
    }

    async fn recover_reorder(
        &self,
        workflow_id: Uuid,
        previous: &[WorkflowStep],
        err: StoreError,
    ) -> AppError {
        warn!("Reorder of workflow {} failed: {}", workflow_id, err);

        let current = match self.store.list_steps(workflow_id).await {
            Ok(steps) => steps,
            Err(read_err) => {
                error!(
                    "Could not re-read steps of workflow {} after failed reorder: {}",
                    workflow_id, read_err
                );
                return inconsistent(workflow_id, previous.iter().map(|s| s.id).collect());
            }
        };

        let affected = changed_steps(previous, &current);
        if affected.is_empty() {
            return err.into();
        }

        match self.store.write_step_orders(workflow_id, previous).await {
            Ok(()) => {
                warn!(
                    "Restored previous step order of workflow {} after partial reorder",
                    workflow_id
                );
                err.into()
            }
            Err(restore_err) => {
                error!(
                    "Could not restore step order of workflow {}: {}",
                    workflow_id, restore_err
                );
                inconsistent(workflow_id, affected)
            }
        }
    }

    /// Deep copy under a new id, always inactive
    pub async fn duplicate(&self, id: Uuid) -> ApiResult<WorkflowWithSteps> {
        let source = self.require_workflow(id).await?;
        let steps = self.store.list_steps(id).await?;

        let copy = Workflow {
            id: Uuid::new_v4(),
            name: format!("{} (Copy)", source.name),
            description: source.description.clone(),
            trigger_type: source.trigger_type,
            trigger_value: match source.trigger_type {
                TriggerType::Webhook => Some(new_hook_key()),
                _ => source.trigger_value.clone(),
            },
            is_active: false,
            created_at: Utc::now(),
            updated_at: None,
        };
        let copied_steps: Vec<WorkflowStep> = steps
            .iter()
            .map(|s| WorkflowStep {
                id: Uuid::new_v4(),
                workflow_id: copy.id,
                created_at: copy.created_at,
                updated_at: None,
                ..s.clone()
            })
            .collect();

        self.store
            .insert_workflow_with_steps(&copy, &copied_steps)
            .await?;
        info!(
            "Duplicated workflow {} as {} with {} steps",
            id,
            copy.id,
            copied_steps.len()
        );
        Ok(WorkflowWithSteps::new(copy, &copied_steps))
    }

    /// Follow the workflow for one subscriber: render emails, resolve branches
    /// and apply action effects to a copy of the subscriber along the way
    pub async fn preview(&self, id: Uuid, subscriber: &Subscriber) -> ApiResult<WorkflowPreview> {
        self.require_workflow(id).await?;
        let steps = self.store.list_steps(id).await?;
        let graph = StepGraph::new(&steps)?;
        let limit = graph.len() * 2 + 1;

        let started = Utc::now();
        let mut simulated = subscriber.clone();
        let mut offset = Duration::zero();
        let mut path = Vec::new();
        let mut current = graph.first();

        while let Some(step) = current {
            if path.len() >= limit {
                break;
            }
            let mut entry = PreviewStep {
                step_id: step.id,
                step_order: step.step_order,
                name: step.name.clone(),
                step_type: step.kind(),
                offset_minutes: offset.num_minutes(),
                email: None,
                branch_taken: None,
                effect: None,
            };
            match &step.payload {
                StepPayload::Email(email) => entry.email = Some(email.render(&simulated)),
                StepPayload::Delay(delay) => {
                    offset = offset
                        .checked_add(&delay.duration())
                        .ok_or_else(delay_overflow)?;
                }
                StepPayload::Condition(branch) => {
                    entry.branch_taken = Some(branch.condition.matches(&simulated));
                }
                StepPayload::Action(action) => {
                    let at = started
                        .checked_add_signed(offset)
                        .ok_or_else(delay_overflow)?;
                    let effect = action.effect(at);
                    effect.apply_to(&mut simulated);
                    entry.effect = Some(effect);
                }
            }
            let outcome = entry.branch_taken;
            path.push(entry);
            current = graph.next(step.step_order, outcome);
        }

        Ok(WorkflowPreview {
            workflow_id: id,
            subscriber_id: subscriber.id,
            truncated: current.is_some(),
            path,
            total_delay_minutes: offset.num_minutes(),
            dangling_targets: graph.dangling_targets(),
        })
    }
}

/// Steps whose persisted order or branch targets differ from `previous`
fn changed_steps(previous: &[WorkflowStep], current: &[WorkflowStep]) -> Vec<Uuid> {
    let current: HashMap<Uuid, &WorkflowStep> = current.iter().map(|s| (s.id, s)).collect();
    previous
        .iter()
        .filter(|before| match current.get(&before.id) {
            Some(now) => now.step_order != before.step_order || now.branch() != before.branch(),
            None => true,
        })
        .map(|s| s.id)
        .collect()
}

fn delay_overflow() -> AppError {
    validation_error("delay_value", "Workflow delays add up to more than can be scheduled")
}

fn inconsistent(workflow_id: Uuid, affected: Vec<Uuid>) -> AppError {
    AppError::Inconsistent {
        message: format!(
            "Step order of workflow {} was partially updated and could not be restored",
            workflow_id
        ),
        affected: affected.iter().map(Uuid::to_string).collect(),
    }
}
