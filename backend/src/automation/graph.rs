// Workflow Step Graph - control flow over ordered, branchable steps
//
// Steps run in ascending `step_order`. A condition step may jump to any order
// through its branch targets; an unset target falls through to the next step.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use super::steps::{StepPayload, WorkflowStep};
use crate::error::{validation_error, ApiResult, ValidationBuilder};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    True,
    False,
}

/// A branch target that names no existing step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DanglingTarget {
    pub step_id: Uuid,
    pub step_order: i32,
    pub branch: Branch,
    pub target: i32,
}

pub struct StepGraph<'a> {
    steps: Vec<&'a WorkflowStep>,
}

impl<'a> StepGraph<'a> {
    /// Orders must be positive and unique within the workflow
    pub fn new(steps: &'a [WorkflowStep]) -> ApiResult<Self> {
        let mut seen = HashSet::new();
        for step in steps {
            if step.step_order < 1 {
                return Err(validation_error("step_order", "Step order must be positive"));
            }
            if !seen.insert(step.step_order) {
                return Err(validation_error(
                    "step_order",
                    &format!("Step order {} is used more than once", step.step_order),
                ));
            }
        }

        let mut steps: Vec<&WorkflowStep> = steps.iter().collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first(&self) -> Option<&'a WorkflowStep> {
        self.steps.first().copied()
    }

    pub fn get(&self, order: i32) -> Option<&'a WorkflowStep> {
        self.steps
            .binary_search_by_key(&order, |s| s.step_order)
            .ok()
            .map(|i| self.steps[i])
    }

    /// The step with the next higher order
    pub fn fall_through(&self, order: i32) -> Option<&'a WorkflowStep> {
        self.steps.iter().copied().find(|s| s.step_order > order)
    }

    /// Where control goes after the step at `order`. `outcome` is the result of
    /// a condition step and is ignored for every other kind. A dangling branch
    /// target ends the run.
    pub fn next(&self, order: i32, outcome: Option<bool>) -> Option<&'a WorkflowStep> {
        let current = self.get(order)?;
        match (current.branch(), outcome) {
            (Some(branch), Some(outcome)) => match branch.target(outcome) {
                Some(target) => self.get(target),
                None => self.fall_through(order),
            },
            _ => self.fall_through(order),
        }
    }

    pub fn dangling_targets(&self) -> Vec<DanglingTarget> {
        let mut dangling = Vec::new();
        for step in &self.steps {
            let Some(branch) = step.branch() else { continue };
            for (kind, target) in [
                (Branch::True, branch.true_next_step),
                (Branch::False, branch.false_next_step),
            ] {
                if let Some(target) = target {
                    if self.get(target).is_none() {
                        dangling.push(DanglingTarget {
                            step_id: step.id,
                            step_order: step.step_order,
                            branch: kind,
                            target,
                        });
                    }
                }
            }
        }
        dangling
    }

    /// Sum of every delay step, i.e. the wait along the straight-line path.
    /// `None` when the total does not fit a `Duration`.
    pub fn linear_delay(&self) -> Option<Duration> {
        self.steps
            .iter()
            .filter_map(|s| match &s.payload {
                StepPayload::Delay(delay) => Some(delay.duration()),
                _ => None,
            })
            .try_fold(Duration::zero(), |acc, d| acc.checked_add(&d))
    }
}

/// Apply a new sequence: orders become dense `1..N` in `sequence` order, and
/// branch targets are remapped to keep pointing at the same step. Targets that
/// were already dangling are cleared; a condition step left with no target at
/// all rejects the sequence.
pub fn renumber(steps: &[WorkflowStep], sequence: &[Uuid]) -> ApiResult<Vec<WorkflowStep>> {
    let mut errors = ValidationBuilder::new();
    let by_id: HashMap<Uuid, &WorkflowStep> = steps.iter().map(|s| (s.id, s)).collect();

    let mut seen = HashSet::new();
    for id in sequence {
        if !by_id.contains_key(id) {
            errors.push("step_ids", &format!("Step {} does not belong to this workflow", id));
        }
        if !seen.insert(*id) {
            errors.push("step_ids", &format!("Step {} is listed more than once", id));
        }
    }
    if sequence.len() != steps.len() {
        errors.push("step_ids", "Every step of the workflow must be listed exactly once");
    }
    errors.finish()?;

    let old_order_to_id: HashMap<i32, Uuid> = steps.iter().map(|s| (s.step_order, s.id)).collect();
    let new_order_of: HashMap<Uuid, i32> = sequence
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i as i32 + 1))
        .collect();

    let remap = |target: Option<i32>, step: &WorkflowStep| -> Option<i32> {
        let target = target?;
        match old_order_to_id.get(&target).and_then(|id| new_order_of.get(id)) {
            Some(order) => Some(*order),
            None => {
                warn!(
                    "Clearing dangling branch target {} on step {} during reorder",
                    target, step.id
                );
                None
            }
        }
    };

    let mut orphaned = ValidationBuilder::new();
    let mut result = Vec::with_capacity(sequence.len());
    for id in sequence {
        let original = by_id[id];
        let mut step = original.clone();
        step.step_order = new_order_of[id];
        if let (Some(branch), Some(orig)) = (step.branch_mut(), original.branch()) {
            branch.true_next_step = remap(orig.true_next_step, original);
            branch.false_next_step = remap(orig.false_next_step, original);
            if !branch.has_target() {
                orphaned.push(
                    "step_ids",
                    &format!(
                        "Step '{}' only branches to missing steps; change its targets first",
                        original.name
                    ),
                );
            }
        }
        result.push(step);
    }
    orphaned.finish()?;
    Ok(result)
}

/// Clear branch targets that point at `order`, returning the changed steps.
/// Fails when a condition step would be left with no target at all.
pub fn clear_references(steps: &[WorkflowStep], order: i32) -> ApiResult<Vec<WorkflowStep>> {
    let mut changed = Vec::new();
    let mut errors = ValidationBuilder::new();

    for step in steps.iter().filter(|s| s.step_order != order) {
        let Some(branch) = step.branch() else { continue };
        if branch.true_next_step != Some(order) && branch.false_next_step != Some(order) {
            continue;
        }

        let mut updated = step.clone();
        if let Some(b) = updated.branch_mut() {
            if b.true_next_step == Some(order) {
                b.true_next_step = None;
            }
            if b.false_next_step == Some(order) {
                b.false_next_step = None;
            }
            if !b.has_target() {
                errors.push(
                    "step_id",
                    &format!(
                        "Step '{}' branches only to this step; change its targets first",
                        step.name
                    ),
                );
                continue;
            }
        }
        changed.push(updated);
    }

    errors.finish()?;
    Ok(changed)
}
