use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tests::fixtures::lead_rule_json;
use crate::tests::helpers::test_app;

fn lead_created(record: Value) -> Value {
    json!({
        "event_id": Uuid::new_v4(),
        "occurred_at": "2024-05-01T09:30:00Z",
        "trigger": "entity",
        "entity": "lead",
        "event": "created",
        "record": record
    })
}

#[tokio::test]
async fn test_rule_crud_and_toggle() {
    let app = test_app();

    let (status, rule) = app.post("/api/v1/automation-rules", lead_rule_json()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(rule["is_active"], true);
    assert_eq!(rule["actions"][0]["type"], "create_task");
    assert_eq!(rule["actions"][0]["params"]["priority"], "high");
    let id = rule["id"].as_str().unwrap().to_string();

    let (status, list) = app.get("/api/v1/automation-rules").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let mut update = lead_rule_json();
    update["name"] = json!("Website leads");
    let (status, body) = app
        .put(&format!("/api/v1/automation-rules/{}", id), update)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["name"], "Website leads");

    let (status, body) = app
        .post(&format!("/api/v1/automation-rules/{}/toggle", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (status, _) = app.delete(&format!("/api/v1/automation-rules/{}", id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.delete(&format!("/api/v1/automation-rules/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rule_validation() {
    let app = test_app();

    let (status, body) = app
        .post(
            "/api/v1/automation-rules",
            json!({
                "name": "Bad",
                "trigger_entity": "task",
                "trigger_event": "created",
                "conditions": [{ "field": "shoe_size", "operator": "equals", "value": "9" }],
                "actions": [
                    { "type": "assign_lead", "params": { "user_id": Uuid::new_v4() } },
                    { "type": "notify", "params": { "title": "Heads up" } }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let details = &body["details"];
    assert!(details["conditions[0].field"].is_array());
    assert!(details["actions[0].type"].is_array());
    assert!(details["actions[1].params.message"].is_array());

    let (status, body) = app
        .post(
            "/api/v1/automation-rules",
            json!({
                "name": "No actions",
                "trigger_entity": "lead",
                "trigger_event": "updated",
                "actions": []
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["actions"].is_array());
}

#[tokio::test]
async fn test_evaluate_entity_event() {
    let app = test_app();
    let (_, rule) = app.post("/api/v1/automation-rules", lead_rule_json()).await;

    let (status, matches) = app
        .post(
            "/api/v1/automation-rules/evaluate",
            lead_created(json!({ "name": "Ada", "source": "Website" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let matches = matches.as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["rule_id"], rule["id"]);
    assert_eq!(matches[0]["actions"][0]["params"]["title"], "Call back");

    let (_, matches) = app
        .post(
            "/api/v1/automation-rules/evaluate",
            lead_created(json!({ "name": "Bob", "source": "referral" })),
        )
        .await;
    assert_eq!(matches, json!([]));

    // Inactive rules never fire
    app.post(
        &format!("/api/v1/automation-rules/{}/toggle", rule["id"].as_str().unwrap()),
        json!({}),
    )
    .await;
    let (_, matches) = app
        .post(
            "/api/v1/automation-rules/evaluate",
            lead_created(json!({ "source": "website" })),
        )
        .await;
    assert_eq!(matches, json!([]));
}

#[tokio::test]
async fn test_evaluate_rejects_subscriber_events() {
    let app = test_app();
    let (status, body) = app
        .post(
            "/api/v1/automation-rules/evaluate",
            json!({
                "event_id": Uuid::new_v4(),
                "occurred_at": "2024-05-01T09:30:00Z",
                "trigger": "subscribed",
                "subscriber_id": Uuid::new_v4()
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}
