use axum::http::StatusCode;
use serde_json::{json, Value};

use crate::tests::fixtures::*;
use crate::tests::helpers::{test_app, TestApp};

async fn create_workflow(app: &TestApp, body: Value) -> String {
    let (status, body) = app.post("/api/v1/workflows", body).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn add_step(app: &TestApp, workflow_id: &str, step: Value) -> Value {
    let (status, body) = app
        .post(&format!("/api/v1/workflows/{}/steps", workflow_id), step)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn test_workflow_lifecycle() {
    let app = test_app();
    let id = create_workflow(
        &app,
        json!({ "name": "Welcome series", "trigger_type": "on_subscribe" }),
    )
    .await;

    let (status, body) = app.get(&format!("/api/v1/workflows/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);
    assert_eq!(body["steps"], json!([]));

    // Nothing to run yet
    let (status, body) = app
        .post(&format!("/api/v1/workflows/{}/activate", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["steps"].is_array());

    add_step(&app, &id, email_step_json()).await;
    add_step(
        &app,
        &id,
        json!({ "step_type": "delay", "delay_value": 2, "delay_unit": "days" }),
    )
    .await;

    let (status, body) = app
        .post(&format!("/api/v1/workflows/{}/activate", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);

    let (_, body) = app.get(&format!("/api/v1/workflows/{}", id)).await;
    assert_eq!(body["steps"].as_array().unwrap().len(), 2);
    assert_eq!(body["total_delay_minutes"], 2 * 24 * 60);

    let (status, body) = app
        .put(
            &format!("/api/v1/workflows/{}", id),
            json!({ "name": "Welcome series v2", "trigger_type": "on_subscribe" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Welcome series v2");
    assert_eq!(body["is_active"], true);

    let (status, _) = app.delete(&format!("/api/v1/workflows/{}", id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&format!("/api/v1/workflows/{}/steps", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_workflow_validation() {
    let app = test_app();

    let (status, body) = app
        .post("/api/v1/workflows", json!({ "name": "", "trigger_type": "on_birthday" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["name"].is_array());
    assert!(body["details"]["trigger_type"].is_array());

    let (status, body) = app
        .post(
            "/api/v1/workflows",
            json!({ "name": "Joined", "trigger_type": "on_segment_join", "trigger_value": "vip" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["trigger_value"].is_array());

    let (status, body) = app
        .post("/api/v1/workflows", json!({ "name": "Inbound", "trigger_type": "webhook" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["trigger_value"].as_str().unwrap().len(), 32);
}

#[tokio::test]
async fn test_step_validation_errors() {
    let app = test_app();
    let id = create_workflow(&app, json!({ "name": "Steps", "trigger_type": "manual" })).await;
    let uri = format!("/api/v1/workflows/{}/steps", id);

    let (status, body) = app
        .post(&uri, json!({ "step_type": "condition", "condition_field": "lead_score", "condition_operator": "greater_than", "condition_value": "10" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["true_next_step"].is_array());

    let (status, body) = app
        .post(&uri, json!({ "step_type": "action", "action_type": "add_tag", "action_config": {} }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["action_config.tag_name"].is_array());

    let step = add_step(
        &app,
        &id,
        json!({ "step_type": "action", "action_type": "add_tag", "action_config": { "tag_name": "vip" } }),
    )
    .await;
    assert_eq!(step["step_type"], "action");
    assert_eq!(step["action_config"], json!({ "tag_name": "vip" }));
    assert!(step["email_subject"].is_null());
}

#[tokio::test]
async fn test_update_step_switches_kind() {
    let app = test_app();
    let id = create_workflow(&app, json!({ "name": "Switch", "trigger_type": "manual" })).await;
    let step = add_step(&app, &id, email_step_json()).await;
    let step_id = step["id"].as_str().unwrap();

    let (status, body) = app
        .put(
            &format!("/api/v1/workflows/{}/steps/{}", id, step_id),
            json!({ "step_type": "delay", "delay_value": 30, "delay_unit": "minutes", "email_subject": "ignored" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], step_id);
    assert_eq!(body["step_type"], "delay");
    assert_eq!(body["step_order"], 1);
    assert!(body["email_subject"].is_null());
}

#[tokio::test]
async fn test_reorder_and_delete_steps() {
    let app = test_app();
    let id = create_workflow(&app, json!({ "name": "Branching", "trigger_type": "manual" })).await;
    let condition = add_step(
        &app,
        &id,
        json!({
            "step_type": "condition",
            "condition_field": "lead_score",
            "condition_operator": "greater_than",
            "condition_value": "40",
            "true_next_step": 3,
            "false_next_step": 2
        }),
    )
    .await;
    let email = add_step(&app, &id, email_step_json()).await;
    let delay = add_step(
        &app,
        &id,
        json!({ "step_type": "delay", "delay_value": 1, "delay_unit": "hours" }),
    )
    .await;

    let (status, body) = app
        .post(
            &format!("/api/v1/workflows/{}/steps/reorder", id),
            json!({ "step_ids": [delay["id"], email["id"], condition["id"]] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let steps = body.as_array().unwrap();
    assert_eq!(steps[2]["id"], condition["id"]);
    assert_eq!(steps[2]["step_order"], 3);
    assert_eq!(steps[2]["true_next_step"], 1);
    assert_eq!(steps[2]["false_next_step"], 2);

    let (status, body) = app
        .delete(&format!(
            "/api/v1/workflows/{}/steps/{}",
            id,
            delay["id"].as_str().unwrap()
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared_references"], json!([condition["id"]]));

    let (_, steps) = app.get(&format!("/api/v1/workflows/{}/steps", id)).await;
    let steps = steps.as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps[1]["true_next_step"].is_null());
    assert_eq!(steps[1]["false_next_step"], 2);
}

#[tokio::test]
async fn test_duplicate_workflow() {
    let app = test_app();
    let id = create_workflow(&app, json!({ "name": "Original", "trigger_type": "webhook" })).await;
    add_step(&app, &id, email_step_json()).await;
    add_step(&app, &id, json!({ "step_type": "delay", "delay_value": 3, "delay_unit": "days" })).await;

    let (_, original) = app.get(&format!("/api/v1/workflows/{}", id)).await;
    let (status, copy) = app
        .post(&format!("/api/v1/workflows/{}/duplicate", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(copy["id"], original["id"]);
    assert_eq!(copy["name"], "Original (Copy)");
    assert_eq!(copy["is_active"], false);
    // A copied webhook workflow listens on its own key
    assert_ne!(copy["trigger_value"], original["trigger_value"]);
    assert_eq!(copy["steps"].as_array().unwrap().len(), 2);
    assert_eq!(copy["steps"][0]["email_subject"], original["steps"][0]["email_subject"]);
    assert_eq!(copy["steps"][1]["delay_value"], 3);

    let (_, list) = app.get("/api/v1/workflows").await;
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_preview_follows_branches() {
    let app = test_app();
    let id = create_workflow(&app, json!({ "name": "Preview", "trigger_type": "manual" })).await;
    add_step(&app, &id, email_step_json()).await;
    add_step(
        &app,
        &id,
        json!({ "step_type": "delay", "delay_value": 2, "delay_unit": "days" }),
    )
    .await;
    add_step(
        &app,
        &id,
        json!({ "step_type": "action", "action_type": "update_lead_score", "action_config": { "score_change": 50 } }),
    )
    .await;
    add_step(
        &app,
        &id,
        json!({
            "step_type": "condition",
            "condition_field": "lead_score",
            "condition_operator": "greater_than",
            "condition_value": "40",
            "false_next_step": 1
        }),
    )
    .await;

    let mut subscriber = subscriber_with_email("jane@example.com");
    subscriber.name = Some("Jane Doe".to_string());
    subscriber.lead_score = 0;

    let (status, body) = app
        .post(
            &format!("/api/v1/workflows/{}/preview", id),
            json!({ "subscriber": subscriber }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["truncated"], false);
    assert_eq!(body["total_delay_minutes"], 2 * 24 * 60);

    let path = body["path"].as_array().unwrap();
    assert_eq!(path.len(), 4);
    assert_eq!(path[0]["email"]["subject"], "Welcome, Jane Doe");
    assert_eq!(path[2]["offset_minutes"], 2 * 24 * 60);
    // The score bump from the action step is visible to the condition
    assert_eq!(path[3]["branch_taken"], true);
}

#[tokio::test]
async fn test_preview_without_subscriber_uses_sample() {
    let app = test_app();
    let id = create_workflow(&app, json!({ "name": "Sample", "trigger_type": "manual" })).await;
    add_step(&app, &id, email_step_json()).await;

    let (status, body) = app
        .post(&format!("/api/v1/workflows/{}/preview", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"][0]["email"]["body"], "Hi Jane");
}

#[tokio::test]
async fn test_delay_longer_than_a_year_is_rejected() {
    let app = test_app();
    let id = create_workflow(&app, json!({ "name": "Slow", "trigger_type": "manual" })).await;
    let uri = format!("/api/v1/workflows/{}/steps", id);

    let (status, body) = app
        .post(
            &uri,
            json!({ "step_type": "delay", "delay_value": 2147483647, "delay_unit": "weeks" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["delay_value"].is_array());

    add_step(&app, &id, json!({ "step_type": "delay", "delay_value": 52, "delay_unit": "weeks" })).await;
    add_step(
        &app,
        &id,
        json!({ "step_type": "action", "action_type": "add_tag", "action_config": { "tag_name": "patient" } }),
    )
    .await;

    let (status, body) = app
        .post(&format!("/api/v1/workflows/{}/preview", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_delay_minutes"], 52 * 7 * 24 * 60);

    let (status, body) = app.get(&format!("/api/v1/workflows/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["steps"].as_array().unwrap().len(), 2);
}
