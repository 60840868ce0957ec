// Persistence for automation definitions
//
// Services are written against these traits. `PgStore` is the production
// backend; `MemoryStore` backs the `memory` backend and the test suite.

use async_trait::async_trait;
use leadflow_shared::{Segment, SegmentMembership, Subscriber};
use thiserror::Error;
use uuid::Uuid;

use crate::automation::{AutomationRule, SegmentRule, Workflow, WorkflowStep};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// A concurrent write took the same unique slot
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn list_segments(&self) -> StoreResult<Vec<Segment>>;
    async fn get_segment(&self, id: Uuid) -> StoreResult<Option<Segment>>;

    async fn list_segment_rules(&self) -> StoreResult<Vec<SegmentRule>>;
    async fn get_segment_rule(&self, id: Uuid) -> StoreResult<Option<SegmentRule>>;
    /// Insert or replace by id
    async fn save_segment_rule(&self, rule: &SegmentRule) -> StoreResult<()>;
    async fn delete_segment_rule(&self, id: Uuid) -> StoreResult<bool>;

    async fn list_subscribers(&self) -> StoreResult<Vec<Subscriber>>;
    async fn get_subscriber(&self, id: Uuid) -> StoreResult<Option<Subscriber>>;

    /// Insert the pair unless it exists. Returns whether a row was added.
    async fn upsert_membership(&self, subscriber_id: Uuid, segment_id: Uuid) -> StoreResult<bool>;
    async fn list_members(&self, segment_id: Uuid) -> StoreResult<Vec<SegmentMembership>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>>;
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<Workflow>>;
    async fn insert_workflow(&self, workflow: &Workflow) -> StoreResult<()>;
    async fn update_workflow(&self, workflow: &Workflow) -> StoreResult<()>;
    /// Deletes the workflow and its steps
    async fn delete_workflow(&self, id: Uuid) -> StoreResult<bool>;
    async fn insert_workflow_with_steps(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> StoreResult<()>;

    /// Steps in ascending order
    async fn list_steps(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowStep>>;
    async fn insert_step(&self, step: &WorkflowStep) -> StoreResult<()>;
    async fn update_step(&self, step: &WorkflowStep) -> StoreResult<()>;
    /// Delete one step and write `cleared` (steps with branch targets removed)
    async fn delete_step(
        &self,
        workflow_id: Uuid,
        step_id: Uuid,
        cleared: &[WorkflowStep],
    ) -> StoreResult<()>;
    /// Write order and branch targets for every given step
    async fn write_step_orders(&self, workflow_id: Uuid, steps: &[WorkflowStep]) -> StoreResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_automation_rules(&self) -> StoreResult<Vec<AutomationRule>>;
    async fn get_automation_rule(&self, id: Uuid) -> StoreResult<Option<AutomationRule>>;
    async fn save_automation_rule(&self, rule: &AutomationRule) -> StoreResult<()>;
    async fn delete_automation_rule(&self, id: Uuid) -> StoreResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// The raw settings document, if one was ever saved
    async fn load_settings(&self) -> StoreResult<Option<serde_json::Value>>;
    async fn save_settings(&self, document: &serde_json::Value) -> StoreResult<()>;
}

/// Everything the HTTP layer needs
pub trait AutomationStore: SegmentStore + WorkflowStore + RuleStore + SettingsStore {}

impl<T> AutomationStore for T where T: SegmentStore + WorkflowStore + RuleStore + SettingsStore {}
