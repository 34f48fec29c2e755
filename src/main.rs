use std::io::Read;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use mail_actions::config::PipelineConfig;
use mail_actions::error::Result;
use mail_actions::pipeline::{
    ActionExecutor, ActionPipeline, Classification, DecisionStage, EmailPayload, RuleResolver,
    RuleTable, RunStatus,
};
use mail_actions::store::{Database, LibSqlBackend};
use mail_actions::tools::{EndpointRegistry, WebhookDispatcher};

/// One pipeline request: the ingested email plus the classifier's verdict.
#[derive(Debug, Deserialize)]
struct RunRequest {
    email: EmailPayload,
    classification: Classification,
    /// Set by the caller; `nhr` records the escalation and runs nothing.
    #[serde(default)]
    stage: Option<DecisionStage>,
    #[serde(default)]
    nhr_token: Option<String>,
}

/// A reviewer's answer to an escalated email.
#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    nhr_token: String,
    final_classification: String,
    /// Free-text note from the reviewer.
    #[serde(default)]
    human: Option<String>,
}

/// Read the request body from a file argument, or stdin for none / `-`.
fn read_input(path: Option<String>) -> Result<String> {
    match path {
        Some(path) if path != "-" => Ok(std::fs::read_to_string(&path)?),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::from_env()?;

    let mut args = std::env::args().skip(1).peekable();
    let feedback = args.next_if(|a| a == "feedback").is_some();
    let raw = read_input(args.next())?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let endpoints = EndpointRegistry::from_map(config.endpoints.clone());
    tracing::info!(bound = ?endpoints.list(), "Webhook endpoints");
    let dispatcher = Arc::new(WebhookDispatcher::new(endpoints, config.dispatch_timeout));
    let executor = Arc::new(ActionExecutor::new(dispatcher).with_store(Arc::clone(&db)));
    let table = RuleTable::load_or_empty(&config.rules_path);
    tracing::debug!(classifications = ?table.classifications(), "Rule taxonomy");
    let resolver = RuleResolver::new(table);
    let pipeline = ActionPipeline::new(resolver, executor).with_store(Arc::clone(&db));

    if feedback {
        let request: FeedbackRequest = serde_json::from_str(&raw)?;
        let outcome = pipeline
            .apply_feedback(
                &request.nhr_token,
                &request.final_classification,
                request.human.as_deref(),
            )
            .await?;
        let response = json!({
            "status": "ok",
            "message_id": outcome.message_id,
            "executed": outcome.receipts,
        });
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let request: RunRequest = serde_json::from_str(&raw)?;
    let email = request.email.validate()?;

    if let Err(e) = pipeline.record_intake(&email).await {
        tracing::warn!(error = %e, "Failed to record intake");
    }

    let stage = request.stage.unwrap_or(DecisionStage::Auto);
    let token = match pipeline
        .record_decision(&email, &request.classification, stage, request.nhr_token.as_deref())
        .await
    {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to record decision");
            None
        }
    };

    let response = if stage == DecisionStage::Nhr {
        if let Err(e) = pipeline
            .finalize_status(&email.message_id, RunStatus::Escalated)
            .await
        {
            tracing::warn!(error = %e, "Failed to finalize status");
        }
        json!({ "status": "processed", "escalated": true, "nhr_token": token, "executed": [] })
    } else {
        let outcome = pipeline.run(&email, &request.classification).await;
        let status = RunStatus::from_receipts(&outcome.receipts);
        if let Err(e) = pipeline.finalize_status(&outcome.message_id, status).await {
            tracing::warn!(error = %e, "Failed to finalize status");
        }
        json!({
            "status": "processed",
            "escalated": false,
            "message_id": outcome.message_id,
            "executed": outcome.receipts,
        })
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
