// Unit tests for workflow editing: activation, step validation, reordering

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::automation::steps::{DelaySpec, DelayUnit};
use crate::automation::{StepKind, StepPayload, Workflow, WorkflowService, WorkflowStep};
use crate::error::AppError;
use crate::store::{MemoryStore, MockWorkflowStore, StoreError, WorkflowStore};
use crate::tests::fixtures::*;
use crate::tests::helpers::{error_fields, init_test_logging};

fn service(store: Arc<MemoryStore>) -> WorkflowService<MemoryStore> {
    WorkflowService::new(store, 10)
}

async fn new_workflow(svc: &WorkflowService<MemoryStore>) -> Workflow {
    svc.create(workflow_input("manual")).await.unwrap()
}

#[tokio::test]
async fn test_empty_workflow_cannot_be_activated() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(store.clone());
    let workflow = new_workflow(&svc).await;
    assert!(!workflow.is_active);

    let err = svc.set_active(workflow.id, true).await.unwrap_err();
    assert_eq!(error_fields(&err), vec!["steps"]);
    assert!(!svc.get(workflow.id).await.unwrap().workflow.is_active);

    svc.add_step(workflow.id, email_step()).await.unwrap();
    assert!(svc.set_active(workflow.id, true).await.unwrap().is_active);
    assert!(!svc.set_active(workflow.id, false).await.unwrap().is_active);
}

#[tokio::test]
async fn test_condition_step_needs_a_target() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;

    let err = svc
        .add_step(workflow.id, condition_step(None, None))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(svc.list_steps(workflow.id).await.unwrap().is_empty());

    let step = svc
        .add_step(workflow.id, condition_step(Some(2), None))
        .await
        .unwrap();
    assert_eq!(step.kind(), StepKind::Condition);
    assert_eq!(step.branch().unwrap().true_next_step, Some(2));
}

#[tokio::test]
async fn test_add_tag_action_round_trips() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;

    let err = svc
        .add_step(workflow.id, action_step("add_tag", json!({})))
        .await
        .unwrap_err();
    assert_eq!(error_fields(&err), vec!["action_config.tag_name"]);

    let saved = svc.add_step(workflow.id, add_tag_step("vip")).await.unwrap();
    let reloaded = svc.list_steps(workflow.id).await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].payload, saved.payload);

    let record = reloaded[0].to_record();
    assert_eq!(record.fields.action_type.as_deref(), Some("add_tag"));
    assert_eq!(record.fields.action_config, Some(json!({ "tag_name": "vip" })));
}

#[tokio::test]
async fn test_steps_are_appended_in_order_up_to_the_limit() {
    let svc = WorkflowService::new(Arc::new(MemoryStore::new()), 2);
    let workflow = svc.create(workflow_input("manual")).await.unwrap();

    let first = svc.add_step(workflow.id, email_step()).await.unwrap();
    let second = svc.add_step(workflow.id, delay_step(2, "days")).await.unwrap();
    assert_eq!((first.step_order, second.step_order), (1, 2));

    let err = svc.add_step(workflow.id, email_step()).await.unwrap_err();
    assert_eq!(error_fields(&err), vec!["steps"]);
}

#[tokio::test]
async fn test_duplicate_copies_steps_and_stays_inactive() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    svc.add_step(workflow.id, email_step()).await.unwrap();
    svc.add_step(workflow.id, delay_step(3, "days")).await.unwrap();
    svc.add_step(workflow.id, condition_step(Some(1), None)).await.unwrap();
    svc.set_active(workflow.id, true).await.unwrap();

    let original = svc.get(workflow.id).await.unwrap();
    let copy = svc.duplicate(workflow.id).await.unwrap();

    assert_ne!(copy.workflow.id, workflow.id);
    assert!(!copy.workflow.is_active);
    assert_eq!(copy.workflow.name, format!("{} (Copy)", workflow.name));
    assert_eq!(copy.steps.len(), 3);
    for (before, after) in original.steps.iter().zip(&copy.steps) {
        assert_ne!(before.id, after.id);
        assert_eq!(after.workflow_id, copy.workflow.id);
        assert_eq!(before.step_order, after.step_order);
        assert_eq!(before.step_type, after.step_type);
        assert_eq!(before.name, after.name);
        assert_eq!(before.fields, after.fields);
    }

    // The source is untouched
    let again = svc.get(workflow.id).await.unwrap();
    assert!(again.workflow.is_active);
    assert_eq!(again.steps, original.steps);
}

#[tokio::test]
async fn test_delete_step_clears_branch_references() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    let condition = svc
        .add_step(workflow.id, condition_step(Some(3), Some(2)))
        .await
        .unwrap();
    svc.add_step(workflow.id, email_step()).await.unwrap();
    let target = svc.add_step(workflow.id, email_step()).await.unwrap();

    let deletion = svc.delete_step(workflow.id, target.id).await.unwrap();
    assert_eq!(deletion.deleted, target.id);
    assert_eq!(deletion.cleared_references, vec![condition.id]);

    let steps = svc.list_steps(workflow.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    let branch = steps[0].branch().unwrap();
    assert_eq!(branch.true_next_step, None);
    assert_eq!(branch.false_next_step, Some(2));
}

#[tokio::test]
async fn test_delete_step_blocked_when_branch_would_be_empty() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    svc.add_step(workflow.id, condition_step(Some(2), None)).await.unwrap();
    let only_target = svc.add_step(workflow.id, email_step()).await.unwrap();

    let err = svc.delete_step(workflow.id, only_target.id).await.unwrap_err();
    assert_eq!(error_fields(&err), vec!["step_id"]);
    assert_eq!(svc.list_steps(workflow.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_last_step_of_active_workflow_is_kept() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    let step = svc.add_step(workflow.id, email_step()).await.unwrap();
    svc.set_active(workflow.id, true).await.unwrap();

    let err = svc.delete_step(workflow.id, step.id).await.unwrap_err();
    assert_eq!(error_fields(&err), vec!["steps"]);

    svc.set_active(workflow.id, false).await.unwrap();
    svc.delete_step(workflow.id, step.id).await.unwrap();
    assert!(svc.list_steps(workflow.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reorder_remaps_branch_targets() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    let condition = svc
        .add_step(workflow.id, condition_step(Some(3), None))
        .await
        .unwrap();
    let email = svc.add_step(workflow.id, email_step()).await.unwrap();
    let delay = svc.add_step(workflow.id, delay_step(1, "hours")).await.unwrap();

    svc.reorder_steps(workflow.id, &[delay.id, condition.id, email.id])
        .await
        .unwrap();

    let steps = svc.list_steps(workflow.id).await.unwrap();
    let ids: Vec<Uuid> = steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![delay.id, condition.id, email.id]);
    let orders: Vec<i32> = steps.iter().map(|s| s.step_order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    // Still points at the delay step, now first
    assert_eq!(steps[1].branch().unwrap().true_next_step, Some(1));
}

#[tokio::test]
async fn test_reorder_rejects_incomplete_sequence() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    let first = svc.add_step(workflow.id, email_step()).await.unwrap();
    svc.add_step(workflow.id, email_step()).await.unwrap();

    let err = svc.reorder_steps(workflow.id, &[first.id]).await.unwrap_err();
    assert_eq!(error_fields(&err), vec!["step_ids"]);

    let err = svc
        .reorder_steps(workflow.id, &[first.id, Uuid::new_v4()])
        .await
        .unwrap_err();
    assert_eq!(error_fields(&err), vec!["step_ids"]);
}

#[tokio::test]
async fn test_reorder_rejects_condition_left_without_target() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    // Forward target to a step that does not exist yet
    let condition = svc
        .add_step(workflow.id, condition_step(Some(5), None))
        .await
        .unwrap();
    let email = svc.add_step(workflow.id, email_step()).await.unwrap();

    let err = svc
        .reorder_steps(workflow.id, &[email.id, condition.id])
        .await
        .unwrap_err();
    assert_eq!(error_fields(&err), vec!["step_ids"]);

    let steps = svc.list_steps(workflow.id).await.unwrap();
    assert_eq!(steps[0].id, condition.id);
    assert_eq!(steps[0].branch().unwrap().true_next_step, Some(5));
}

#[tokio::test]
async fn test_oversized_delay_is_rejected() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;

    let err = svc
        .add_step(workflow.id, delay_step(i32::MAX, "weeks"))
        .await
        .unwrap_err();
    assert_eq!(error_fields(&err), vec!["delay_value"]);
    assert!(svc.list_steps(workflow.id).await.unwrap().is_empty());
}

fn huge_delay(workflow_id: Uuid, order: i32) -> WorkflowStep {
    WorkflowStep::new(
        workflow_id,
        order,
        "Wait forever",
        StepPayload::Delay(DelaySpec {
            value: u32::MAX,
            unit: DelayUnit::Weeks,
        }),
    )
}

#[tokio::test]
async fn test_unschedulable_delays_do_not_panic() {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let svc = service(store.clone());
    let workflow = new_workflow(&svc).await;

    // Written straight to the store, as an older release might have
    store.insert_step(&huge_delay(workflow.id, 1)).await.unwrap();
    let tag = WorkflowStep::new(workflow.id, 2, "Tag", add_tag_step("late").payload().unwrap());
    store.insert_step(&tag).await.unwrap();

    let err = svc
        .preview(workflow.id, &subscriber_fixture())
        .await
        .unwrap_err();
    assert_eq!(error_fields(&err), vec!["delay_value"]);

    for order in 3..=9 {
        store.insert_step(&huge_delay(workflow.id, order)).await.unwrap();
    }
    let loaded = svc.get(workflow.id).await.unwrap();
    assert_eq!(loaded.steps.len(), 9);
    assert_eq!(loaded.total_delay_minutes, i64::MAX);

    let err = svc
        .preview(workflow.id, &subscriber_fixture())
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_preview_truncates_looping_branch() {
    let svc = service(Arc::new(MemoryStore::new()));
    let workflow = new_workflow(&svc).await;
    svc.add_step(workflow.id, email_step()).await.unwrap();
    // lead_score > 40 jumps back to the email forever
    svc.add_step(workflow.id, condition_step(Some(1), None))
        .await
        .unwrap();

    let mut subscriber = subscriber_fixture();
    subscriber.lead_score = 90;
    let preview = svc.preview(workflow.id, &subscriber).await.unwrap();

    assert!(preview.truncated);
    assert_eq!(preview.path.len(), 5);
    let orders: Vec<i32> = preview.path.iter().map(|p| p.step_order).collect();
    assert_eq!(orders, vec![1, 2, 1, 2, 1]);

    subscriber.lead_score = 10;
    let preview = svc.preview(workflow.id, &subscriber).await.unwrap();
    assert!(!preview.truncated);
    assert_eq!(preview.path.len(), 2);
}

#[tokio::test]
async fn test_concurrent_append_is_a_retryable_validation_error() {
    init_test_logging();
    let workflow = workflow_fixture();

    let mut store = MockWorkflowStore::new();
    let found = workflow.clone();
    store
        .expect_get_workflow()
        .returning(move |_| Ok(Some(found.clone())));
    store.expect_list_steps().returning(|_| Ok(Vec::new()));
    store
        .expect_insert_step()
        .times(1)
        .returning(|_| Err(StoreError::Conflict("step order 1 already used".to_string())));

    let svc = WorkflowService::new(Arc::new(store), 10);
    let err = svc.add_step(workflow.id, email_step()).await.unwrap_err();
    assert_eq!(error_fields(&err), vec!["steps"]);
}

#[tokio::test]
async fn test_memory_store_reports_order_clash_as_conflict() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(store.clone());
    let workflow = new_workflow(&svc).await;
    let first = svc.add_step(workflow.id, email_step()).await.unwrap();

    let clash = WorkflowStep::new(workflow.id, first.step_order, "Clash", first.payload.clone());
    let result = store.insert_step(&clash).await;
    assert!(matches!(result, Err(StoreError::Conflict(_))));
}

// ============================================
// Reorder failure handling
// ============================================

fn stored_steps(workflow_id: Uuid) -> Vec<WorkflowStep> {
    let first = WorkflowStep::new(workflow_id, 1, "First", email_step().payload().unwrap());
    let second = WorkflowStep::new(workflow_id, 2, "Second", delay_step(1, "days").payload().unwrap());
    vec![first, second]
}

fn mock_with_steps(workflow: Workflow, before: Vec<WorkflowStep>, after: StepsAfterFailure) -> MockWorkflowStore {
    let mut store = MockWorkflowStore::new();
    store
        .expect_get_workflow()
        .returning(move |_| Ok(Some(workflow.clone())));

    let mut reads = 0;
    store.expect_list_steps().returning(move |_| {
        reads += 1;
        match (&after, reads) {
            (_, 1) => Ok(before.clone()),
            (StepsAfterFailure::Unchanged, _) => Ok(before.clone()),
            (StepsAfterFailure::Partial(steps), _) => Ok(steps.clone()),
            (StepsAfterFailure::Unreadable, _) => {
                Err(StoreError::Unavailable("read timed out".to_string()))
            }
        }
    });
    store
}

enum StepsAfterFailure {
    Unchanged,
    Partial(Vec<WorkflowStep>),
    Unreadable,
}

fn workflow_fixture() -> Workflow {
    workflow_input("manual").into_workflow(None).unwrap()
}

fn swapped(steps: &[WorkflowStep]) -> Vec<WorkflowStep> {
    let mut partial = steps.to_vec();
    partial[0].step_order = 2;
    partial
}

#[tokio::test]
async fn test_reorder_failure_without_changes_is_clean_reject() {
    init_test_logging();
    let workflow = workflow_fixture();
    let steps = stored_steps(workflow.id);
    let ids = vec![steps[1].id, steps[0].id];

    let mut store = mock_with_steps(workflow.clone(), steps, StepsAfterFailure::Unchanged);
    store
        .expect_write_step_orders()
        .times(1)
        .returning(|_, _| Err(StoreError::Unavailable("deadlock detected".to_string())));

    let svc = WorkflowService::new(Arc::new(store), 10);
    let err = svc.reorder_steps(workflow.id, &ids).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));
}

#[tokio::test]
async fn test_partial_reorder_is_rolled_back() {
    init_test_logging();
    let workflow = workflow_fixture();
    let steps = stored_steps(workflow.id);
    let ids = vec![steps[1].id, steps[0].id];
    let previous = steps.clone();

    let mut store = mock_with_steps(
        workflow.clone(),
        steps.clone(),
        StepsAfterFailure::Partial(swapped(&steps)),
    );
    let mut writes = 0;
    store
        .expect_write_step_orders()
        .times(2)
        .returning(move |_, written| {
            writes += 1;
            if writes == 1 {
                Err(StoreError::Unavailable("connection lost".to_string()))
            } else {
                assert_eq!(written, previous.as_slice());
                Ok(())
            }
        });

    let svc = WorkflowService::new(Arc::new(store), 10);
    let err = svc.reorder_steps(workflow.id, &ids).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));
}

#[tokio::test]
async fn test_unrecoverable_reorder_reports_affected_steps() {
    init_test_logging();
    let workflow = workflow_fixture();
    let steps = stored_steps(workflow.id);
    let ids = vec![steps[1].id, steps[0].id];
    let moved = steps[0].id;

    let mut store = mock_with_steps(
        workflow.clone(),
        steps.clone(),
        StepsAfterFailure::Partial(swapped(&steps)),
    );
    store
        .expect_write_step_orders()
        .times(2)
        .returning(|_, _| Err(StoreError::Unavailable("connection lost".to_string())));

    let svc = WorkflowService::new(Arc::new(store), 10);
    match svc.reorder_steps(workflow.id, &ids).await.unwrap_err() {
        AppError::Inconsistent { affected, .. } => assert_eq!(affected, vec![moved.to_string()]),
        other => panic!("expected inconsistent state, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreadable_state_after_failure_reports_every_step() {
    let workflow = workflow_fixture();
    let steps = stored_steps(workflow.id);
    let ids = vec![steps[1].id, steps[0].id];
    let all: Vec<String> = steps.iter().map(|s| s.id.to_string()).collect();

    let mut store = mock_with_steps(workflow.clone(), steps, StepsAfterFailure::Unreadable);
    store
        .expect_write_step_orders()
        .times(1)
        .returning(|_, _| Err(StoreError::Unavailable("connection lost".to_string())));

    let svc = WorkflowService::new(Arc::new(store), 10);
    match svc.reorder_steps(workflow.id, &ids).await.unwrap_err() {
        AppError::Inconsistent { affected, .. } => assert_eq!(affected, all),
        other => panic!("expected inconsistent state, got {:?}", other),
    }
}

#[tokio::test]
async fn test_store_trait_is_usable_as_object() {
    let store: Arc<dyn WorkflowStore> = Arc::new(MemoryStore::new());
    let svc = WorkflowService::new(store, 10);
    assert!(svc.list().await.unwrap().is_empty());
}
