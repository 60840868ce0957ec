// Marketing Automation Core
//
// Segment rules, subscriber workflows and entity automation rules: the
// definitions the execution engine consumes, plus their evaluation semantics.

pub mod actions;
pub mod conditions;
pub mod graph;
pub mod rules;
pub mod segments;
pub mod steps;
pub mod triggers;
pub mod workflows;

pub use actions::{ActionEffect, ActionType, StepAction};
pub use conditions::{evaluate, Condition, ConditionError, ConditionField, ConditionOperator, FieldValue, RecordFields};
pub use graph::{DanglingTarget, StepGraph};
pub use rules::{AutomationRule, AutomationRuleInput, RuleAction, RuleMatch, RuleService};
pub use segments::{AssignOutcome, BatchReport, SegmentAssigner, SegmentRule, SegmentRuleInput};
pub use steps::{StepFields, StepInput, StepKind, StepPayload, StepRecord, WorkflowStep};
pub use triggers::{EntityEvent, EntityType, EventPayload, TriggerEvent, TriggerType};
pub use workflows::{
    StepDeletion, Workflow, WorkflowInput, WorkflowPreview, WorkflowService, WorkflowWithSteps,
};
