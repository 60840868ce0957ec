use axum::http::StatusCode;
use serde_json::json;

use crate::store::SettingsStore;
use crate::tests::helpers::test_app;

#[tokio::test]
async fn test_defaults_until_saved() {
    let app = test_app();
    let (status, body) = app.get("/api/v1/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert_eq!(body["general"]["site_name"], "Leadflow");
    assert_eq!(body["features"]["newsletter"], true);
}

#[tokio::test]
async fn test_partial_update_fills_defaults() {
    let app = test_app();
    let (status, body) = app
        .put(
            "/api/v1/settings",
            json!({ "general": { "site_name": "Acme", "contact_email": "hello@acme.io" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["general"]["site_name"], "Acme");
    assert_eq!(body["sender"]["from_name"], "Leadflow");

    let (_, body) = app.get("/api/v1/settings").await;
    assert_eq!(body["general"]["contact_email"], "hello@acme.io");
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let app = test_app();
    let (status, body) = app
        .put(
            "/api/v1/settings",
            json!({
                "sender": { "from_name": "Acme", "from_email": "not-an-email" },
                "email_templates": {
                    "welcome": { "subject": "Hi", "body": "Your age is {{age}}" }
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["sender.from_email"].is_array());
    assert!(body["details"]["email_templates.welcome.body"].is_array());

    // Nothing was written
    let (_, body) = app.get("/api/v1/settings").await;
    assert_eq!(body["sender"]["from_email"], "no-reply@leadflow.local");
}

#[tokio::test]
async fn test_version_one_document_is_upgraded() {
    let app = test_app();
    app.store
        .save_settings(&json!({
            "site_name": "Old Site",
            "from_email": "old@example.com",
            "whatsapp_enabled": true
        }))
        .await
        .unwrap();

    let (status, body) = app.get("/api/v1/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert_eq!(body["general"]["site_name"], "Old Site");
    assert_eq!(body["sender"]["from_email"], "old@example.com");
    assert_eq!(body["features"]["whatsapp_notifications"], true);
}
