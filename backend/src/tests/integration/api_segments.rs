use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use crate::tests::fixtures::*;
use crate::tests::helpers::test_app;

#[tokio::test]
async fn test_segment_rule_crud() {
    let app = test_app();
    let segment = app.store.insert_segment("Gmail users").await;

    let (status, body) = app
        .post(
            "/api/v1/segments/rules",
            json!({
                "segment_id": segment.id,
                "name": "Gmail",
                "field": "email",
                "operator": "contains",
                "value": "gmail.com"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["is_active"], true);
    let rule_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = app.get(&format!("/api/v1/segments/rules/{}", rule_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["field"], "email");

    let (status, body) = app
        .put(
            &format!("/api/v1/segments/rules/{}", rule_id),
            json!({
                "segment_id": segment.id,
                "name": "Gmail (paused)",
                "field": "email",
                "operator": "contains",
                "value": "gmail.com",
                "is_active": false
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], rule_id.as_str());
    assert_eq!(body["is_active"], false);

    let (status, _) = app.delete(&format!("/api/v1/segments/rules/{}", rule_id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&format!("/api/v1/segments/rules/{}", rule_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_segment_rule_validation() {
    let app = test_app();

    let (status, body) = app
        .post(
            "/api/v1/segments/rules",
            json!({
                "segment_id": Uuid::new_v4(),
                "name": "Broken",
                "field": "favourite_colour",
                "operator": "contains",
                "value": ""
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["details"]["field"].is_array());
    assert!(body["details"]["value"].is_array());

    // Well-formed, but the segment does not exist
    let (status, body) = app
        .post(
            "/api/v1/segments/rules",
            json!({
                "segment_id": Uuid::new_v4(),
                "name": "Orphan",
                "field": "email",
                "operator": "contains",
                "value": "x"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["segment_id"].is_array());
}

#[tokio::test]
async fn test_apply_rules_backfills_segment() {
    let app = test_app();
    let segment = app.store.insert_segment("Gmail users").await;
    let a = subscriber_with_email("a@gmail.com");
    app.store.insert_subscriber(a.clone()).await;
    app.store.insert_subscriber(subscriber_with_email("b@yahoo.com")).await;

    let (status, _) = app
        .post(
            "/api/v1/segments/rules",
            json!({
                "segment_id": segment.id,
                "name": "Gmail",
                "field": "email",
                "operator": "contains",
                "value": "gmail.com"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.post("/api/v1/segments/apply", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added_count"], 1);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["trigger"], "segment_joined");
    assert_eq!(body["events"][0]["subscriber_id"], a.id.to_string());

    let (status, body) = app
        .get(&format!("/api/v1/segments/{}/members", segment.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_assignment_is_idempotent() {
    let app = test_app();
    let segment = app.store.insert_segment("VIP").await;
    let subscriber = subscriber_fixture();
    app.store.insert_subscriber(subscriber.clone()).await;
    let uri = format!("/api/v1/segments/{}/members", segment.id);

    let (status, body) = app.post(&uri, json!({ "subscriber_id": subscriber.id })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"], "added");
    assert_eq!(body["event"]["trigger"], "segment_joined");

    let (status, body) = app.post(&uri, json!({ "subscriber_id": subscriber.id })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_member");
    assert!(body["event"].is_null());

    let (_, members) = app.get(&uri).await;
    assert_eq!(members.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_assignment_to_unknown_records() {
    let app = test_app();
    let segment = app.store.insert_segment("VIP").await;

    let (status, _) = app
        .post(
            &format!("/api/v1/segments/{}/members", segment.id),
            json!({ "subscriber_id": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post(
            &format!("/api/v1/segments/{}/members", Uuid::new_v4()),
            json!({ "subscriber_id": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
