//! Integration tests for the action pipeline against real HTTP.
//!
//! Each test spins up an Axum stub webhook server on a random port and
//! drives the real `WebhookDispatcher` through it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use mail_actions::pipeline::{
    ActionExecutor, ActionPipeline, Classification, DecisionStage, EmailPayload, RuleResolver,
    RuleTable, RunStatus,
};
use mail_actions::store::{Collection, Database, LibSqlBackend, MatchFilter};
use mail_actions::tools::dispatcher::MAX_RAW_BODY_CHARS;
use mail_actions::tools::{EndpointRegistry, WebhookDispatcher};

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

async fn hook(
    State(calls): State<Calls>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    calls.lock().unwrap().push((name.clone(), body));
    match name.as_str() {
        "forward" => (StatusCode::OK, Json(json!({"forwarded": true}))).into_response(),
        "move" => {
            let body = json!({"status": "moved", "newMessageId": "M2"});
            (StatusCode::OK, Json(body)).into_response()
        }
        "flag" => (StatusCode::ACCEPTED, "accepted").into_response(),
        "garbled" => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            "not json {",
        )
            .into_response(),
        "huge" => (StatusCode::OK, "x".repeat(MAX_RAW_BODY_CHARS + 500)).into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            (StatusCode::OK, Json(json!({}))).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"}))).into_response(),
    }
}

/// Start the stub server, return (base url, recorded calls).
async fn start_stub() -> (String, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/hook/{name}", post(hook))
        .with_state(Arc::clone(&calls));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}/hook"), calls)
}

fn registry(base: &str, actions: &[(&str, &str)]) -> EndpointRegistry {
    actions.iter().fold(EndpointRegistry::new(), |reg, (action, path)| {
        reg.with_endpoint(action, &format!("{base}/{path}"))
    })
}

fn email() -> EmailPayload {
    serde_json::from_value::<EmailPayload>(json!({
        "message_id": "M1",
        "internet_message_id": "<inv-42@example.com>",
        "subject": "Invoice 42 overdue",
        "from_": {"name": "Vendor", "email": "v@example.com"},
        "to": [{"name": null, "email": "ap@example.com"}],
        "headers": {"WebLink": "https://mail.example.com/M1"}
    }))
    .unwrap()
    .validate()
    .unwrap()
}

fn pipeline(
    rules: &str,
    endpoints: EndpointRegistry,
    timeout: Duration,
    db: Option<Arc<dyn Database>>,
) -> ActionPipeline {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("actions.yaml");
    std::fs::write(&path, rules).unwrap();
    let resolver = RuleResolver::new(RuleTable::load(&path).unwrap());

    let dispatcher = Arc::new(WebhookDispatcher::new(endpoints, timeout));
    let mut executor = ActionExecutor::new(dispatcher);
    if let Some(db) = &db {
        executor = executor.with_store(Arc::clone(db));
    }
    let pipeline = ActionPipeline::new(resolver, Arc::new(executor));
    match db {
        Some(db) => pipeline.with_store(db),
        None => pipeline,
    }
}

#[tokio::test]
async fn invoice_overdue_forwards_to_sender() {
    let (base, calls) = start_stub().await;
    let rules = r#"
classifications:
  invoice.overdue:
    actions:
      - forward: { to: "{from_email}" }
"#;
    let endpoints = registry(&base, &[("forward", "forward")]);
    let pipeline = pipeline(rules, endpoints, Duration::from_secs(5), None);

    let outcome = pipeline
        .run(&email(), &Classification::new("invoice.overdue", 0.92))
        .await;

    assert_eq!(outcome.receipts.len(), 1);
    let receipt = &outcome.receipts[0];
    assert_eq!(receipt.action, "forward");
    assert!(receipt.ok);
    assert_eq!(receipt.detail.status, Some(200));
    assert_eq!(receipt.detail.body, Some(json!({"forwarded": true})));
    assert_eq!(
        receipt.detail.url.as_deref(),
        Some(format!("{base}/forward").as_str())
    );

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (_, body) = &calls[0];
    assert_eq!(body["params"]["to"], json!(["v@example.com"]));
    assert_eq!(body["email"]["message_id"], "M1");
    assert_eq!(body["email"]["internet_message_id"], "<inv-42@example.com>");
    assert_eq!(body["email"]["from"]["email"], "v@example.com");
    assert_eq!(body["email"]["headers"]["WebLink"], "https://mail.example.com/M1");
}

#[tokio::test]
async fn move_reconciles_identity_and_audits_under_new_id() {
    let (base, calls) = start_stub().await;
    let rules = r#"
filing:
  actions:
    - forward: { to: "archive@example.com" }
    - move: { folder: "Invoices" }
    - flag: { reason: "filed as {message_id}" }
"#;
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let endpoints = registry(
        &base,
        &[("forward", "forward"), ("move", "move"), ("flag", "flag")],
    );
    let pipeline = pipeline(rules, endpoints, Duration::from_secs(5), Some(Arc::clone(&db)));
    let email = email();
    let classification = Classification::new("filing", 0.97);

    pipeline.record_intake(&email).await.unwrap();
    pipeline
        .record_decision(&email, &classification, DecisionStage::Auto, None)
        .await
        .unwrap();

    let outcome = pipeline.run(&email, &classification).await;
    assert_eq!(outcome.message_id, "M2");
    assert!(outcome.receipts.iter().all(|r| r.ok));

    // Text response from a 2xx is still a success.
    assert_eq!(outcome.receipts[2].detail.status, Some(202));
    assert_eq!(outcome.receipts[2].detail.body, Some(json!("accepted")));

    // Steps after the move see the new identity.
    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls[1].1["email"]["message_id"], "M1");
    assert_eq!(calls[2].1["email"]["message_id"], "M2");
    assert_eq!(calls[2].1["params"]["reason"], "filed as M2");

    for collection in Collection::ALL {
        let old = db.find(collection, &MatchFilter::message_id("M1")).await.unwrap();
        assert!(old.is_empty(), "{collection} still has rows under M1");
    }
    let moved = MatchFilter::message_id("M2");
    let intake = db.find(Collection::IntakeLog, &moved).await.unwrap();
    assert_eq!(intake.len(), 1);
    let decisions = db.find(Collection::Decisions, &moved).await.unwrap();
    assert_eq!(decisions.len(), 1);

    let runs = db.find(Collection::ActionRuns, &moved).await.unwrap();
    let actions: Vec<&str> = runs.iter().map(|r| r["action"].as_str().unwrap()).collect();
    assert_eq!(actions, vec!["forward", "move", "flag"]);
    // The move's own audit row was written after reconciliation.
    assert_eq!(runs[1]["request"]["message_id"], "M2");
    assert_eq!(runs[1]["response_body"]["newMessageId"], "M2");

    let updated = pipeline
        .finalize_status(&outcome.message_id, RunStatus::from_receipts(&outcome.receipts))
        .await
        .unwrap();
    assert_eq!(updated, 1);
}

#[tokio::test]
async fn failures_do_not_stop_the_run() {
    let (base, _calls) = start_stub().await;
    let rules = r#"
mixed:
  actions:
    - create_jira: { project: "OPS" }
    - slow: {}
    - delete: {}
    - forward: { to: ["a@x.com", "b@x.com"] }
"#;
    let endpoints = registry(
        &base,
        &[("create_jira", "jira"), ("slow", "slow"), ("forward", "forward")],
    );
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let pipeline = pipeline(rules, endpoints, Duration::from_millis(500), Some(Arc::clone(&db)));

    let outcome = pipeline.run(&email(), &Classification::new("MIXED", 0.8)).await;
    let receipts = &outcome.receipts;
    assert_eq!(receipts.len(), 4);

    // non-2xx
    assert!(!receipts[0].ok);
    assert_eq!(receipts[0].detail.status, Some(500));
    assert_eq!(receipts[0].detail.body, Some(json!({"error": "boom"})));

    // timeout
    assert!(!receipts[1].ok);
    assert_eq!(receipts[1].detail.status, None);
    assert!(receipts[1].detail.error.is_some());
    assert_eq!(
        receipts[1].detail.url.as_deref(),
        Some(format!("{base}/slow").as_str())
    );

    // unbound
    assert!(!receipts[2].ok);
    assert!(receipts[2].detail.url.is_none());
    let error = receipts[2].detail.error.as_deref().unwrap();
    assert!(error.contains("no endpoint configured"));

    assert!(receipts[3].ok);

    let runs = db
        .find(Collection::ActionRuns, &MatchFilter::message_id("M1"))
        .await
        .unwrap();
    assert_eq!(runs.len(), 4);
    assert_eq!(runs[2]["response_body"], json!(receipts[2].detail.error.clone().unwrap()));
}

#[tokio::test]
async fn unparseable_json_and_oversized_text_are_kept_as_text() {
    let (base, _calls) = start_stub().await;
    let rules = r#"
odd:
  actions:
    - garbled: {}
    - huge: {}
"#;
    let endpoints = registry(&base, &[("garbled", "garbled"), ("huge", "huge")]);
    let pipeline = pipeline(rules, endpoints, Duration::from_secs(5), None);

    let outcome = pipeline.run(&email(), &Classification::new("odd", 0.9)).await;
    let receipts = &outcome.receipts;

    assert!(receipts[0].ok);
    assert_eq!(receipts[0].detail.status, Some(200));
    assert_eq!(receipts[0].detail.body, Some(json!("not json {")));

    assert!(receipts[1].ok);
    let text = receipts[1].detail.body.as_ref().unwrap().as_str().unwrap();
    assert_eq!(text.chars().count(), MAX_RAW_BODY_CHARS);
}
