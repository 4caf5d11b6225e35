use std::sync::Arc;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use task_authz::authz::StaticRoleAssignmentSource;
use task_authz::events::AccessLogWorkers;
use task_authz::jwt::JwtConfig;
use task_authz::{create_app, AppState};

async fn setup() -> Result<(TempDir, Router, String, AccessLogWorkers)> {
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");

    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let jwt = JwtConfig::new("test-secret", 1);
    let token = jwt.encode("caller-1")?;
    let workers = AccessLogWorkers::spawn(pool.clone(), 1, 16);
    let state = AppState::new(
        pool,
        jwt,
        workers.handle(),
        Arc::new(StaticRoleAssignmentSource::default()),
    );

    Ok((dir, create_app(state), token, workers))
}

async fn post(app: &Router, token: &str, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(body.to_string()))?;

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

fn caseworker_assignment() -> Value {
    json!({
        "id": "ra-1",
        "actor_id": "user-1",
        "role_name": "tribunal-caseworker",
        "role_category": "LEGAL_OPERATIONS",
        "grant_type": "STANDARD",
        "classification": "PUBLIC",
        "attributes": { "jurisdiction": "IA", "region": "1", "base_location": "765324" }
    })
}

fn ia_task() -> Value {
    json!({
        "task_id": "task-1",
        "jurisdiction": "IA",
        "case_type": "Asylum",
        "case_id": "1623278362431003",
        "region": "1",
        "location": "765324",
        "classification": "PUBLIC",
        "state": "UNASSIGNED"
    })
}

fn caseworker_profile() -> Value {
    json!({
        "role_name": "tribunal-caseworker",
        "classification": "PUBLIC",
        "assignment_priority": 1,
        "auto_assignable": true,
        "granted_permissions": ["READ", "REFER"]
    })
}

#[tokio::test]
async fn authorize_standard_grant_without_case_type() -> Result<()> {
    let (_dir, app, token, _workers) = setup().await?;

    let request = |required: Value| {
        json!({
            "role_assignments": [caseworker_assignment()],
            "task": ia_task(),
            "profiles": [caseworker_profile()],
            "required": required
        })
    };

    let (status, body) = post(&app, &token, "/engine/authorize", request(json!([["READ"]]))).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["matched_role_assignment"]["id"], "ra-1");

    let (_, body) = post(&app, &token, "/engine/authorize", request(json!([["READ", "OWN"]]))).await?;
    assert_eq!(body["allowed"], false);
    assert!(body.get("matched_role_assignment").map_or(true, Value::is_null));

    Ok(())
}

#[tokio::test]
async fn engine_requires_bearer_token() -> Result<()> {
    let (_dir, app, _token, _workers) = setup().await?;

    let req = Request::builder()
        .method("POST")
        .uri("/engine/classify-action")
        .header("content-type", "application/json")
        .body(Body::from(json!({"old_state": "UNASSIGNED", "new_state": "ASSIGNED"}).to_string()))?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn classify_action_names_transitions() -> Result<()> {
    let (_dir, app, token, _workers) = setup().await?;

    let cases = [
        (json!({"initiator": "x", "new_assignee": "x", "old_state": "UNASSIGNED", "new_state": "ASSIGNED"}), "CLAIM"),
        (json!({"initiator": "x", "old_assignee": "x", "old_state": "ASSIGNED", "new_state": "UNASSIGNED"}), "UNCLAIM"),
        (
            json!({"initiator": "x", "old_assignee": "y", "new_assignee": "z", "old_state": "ASSIGNED", "new_state": "ASSIGNED"}),
            "UNASSIGN_ASSIGN",
        ),
        (json!({"new_assignee": "a", "old_state": "UNCONFIGURED", "new_state": "ASSIGNED"}), "AUTO_ASSIGN"),
    ];

    for (request, expected) in cases {
        let (status, body) = post(&app, &token, "/engine/classify-action", request).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], expected);
    }

    Ok(())
}

#[tokio::test]
async fn auto_assignee_prefers_priority_one_role() -> Result<()> {
    let (_dir, app, token, _workers) = setup().await?;

    let holder = |id: &str, actor: &str, role: &str| {
        json!({
            "id": id,
            "actor_id": actor,
            "role_name": role,
            "role_category": "LEGAL_OPERATIONS",
            "grant_type": "STANDARD",
            "classification": "PUBLIC",
            "attributes": { "jurisdiction": "IA" }
        })
    };
    let profiles = json!([
        {"role_name": "role-b", "classification": "PUBLIC", "assignment_priority": 2, "auto_assignable": true},
        {"role_name": "role-a", "classification": "PUBLIC", "assignment_priority": 1, "auto_assignable": true}
    ]);

    for assignments in [
        json!([holder("1", "user-b", "role-b"), holder("2", "user-a", "role-a")]),
        json!([holder("2", "user-a", "role-a"), holder("1", "user-b", "role-b")]),
    ] {
        let (status, body) = post(
            &app,
            &token,
            "/engine/auto-assignee",
            json!({"profiles": profiles, "role_assignments": assignments}),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assignee"], "user-a");
        assert_eq!(body["role_assignment_id"], "2");
    }

    let (_, body) = post(
        &app,
        &token,
        "/engine/auto-assignee",
        json!({"profiles": profiles, "role_assignments": [holder("3", "user-c", "role-c")]}),
    )
    .await?;
    assert!(body["assignee"].is_null());

    Ok(())
}

#[tokio::test]
async fn search_predicate_renders_sql() -> Result<()> {
    let (_dir, app, token, _workers) = setup().await?;

    let (status, body) = post(
        &app,
        &token,
        "/engine/search-predicate",
        json!({
            "role_assignments": [caseworker_assignment()],
            "required": [["READ"]],
            "sort_by": [{"field": "due_date", "direction": "desc"}]
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let sql = body["sql"].as_str().unwrap_or_default();
    assert!(sql.contains("t.jurisdiction IN (?)"), "{}", sql);
    assert!(sql.contains("task_access_profiles"), "{}", sql);
    assert!(body["binds"].as_array().map_or(false, |b| b.contains(&json!("765324"))));
    assert!(body["order_by"].as_str().unwrap_or_default().ends_with("t.id ASC"));

    let (_, empty) = post(
        &app,
        &token,
        "/engine/search-predicate",
        json!({"role_assignments": [], "required": [["READ"]]}),
    )
    .await?;
    assert_eq!(empty["predicate"], json!({"op": "false"}));
    assert_eq!(empty["sql"], "1=0");

    Ok(())
}
