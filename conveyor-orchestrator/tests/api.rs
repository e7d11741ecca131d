//! HTTP API exercised over a real socket

mod common;

use common::*;
use conveyor_core::domain::approval::ApprovalRequest;
use conveyor_core::domain::deployment::{DeploymentPhase, DeploymentRecord};
use conveyor_core::domain::execution::ExecutionStatus;
use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::dto::execution::{ExecutionStatusView, ExecutionSummary};
use conveyor_core::dto::pipeline::PipelineSummary;
use conveyor_orchestrator::api;
use conveyor_orchestrator::engine::scheduler::ConcurrencyPolicy;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

async fn serve(h: &Harness) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(h.engine.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn release_body() -> serde_json::Value {
    json!({
        "name": "shop",
        "description": "storefront",
        "stages": [
            { "name": "Source", "actions": [
                { "name": "Checkout", "kind": "Source", "outputs": ["SourceOutput"] }
            ]},
            { "name": "Build", "actions": [
                { "name": "Compile", "kind": "Build", "inputs": ["SourceOutput"], "outputs": ["BuildOutput"] }
            ]},
            { "name": "Approve", "actions": [
                { "name": "Signoff", "kind": "Approval" }
            ]},
            { "name": "Production", "actions": [
                { "name": "Cutover", "kind": "BlueGreenDeploy", "inputs": ["BuildOutput"],
                  "configuration": { "target": "web", "shift_plan": "25:10ms,50:10ms,100:0ms" } }
            ]}
        ]
    })
}

async fn error_message(response: reqwest::Response) -> String {
    let body: serde_json::Value = response.json().await.unwrap();
    body["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let h = harness(ConcurrencyPolicy::Reject, FakeTarget::default()).await;
    let base = serve(&h).await;

    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["running_executions"], 0);

    h.engine.pool().close().await;
    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_invalid_definition_is_rejected() {
    let h = harness(ConcurrencyPolicy::Reject, FakeTarget::default()).await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let body = json!({
        "name": "broken",
        "stages": [
            { "name": "Build", "actions": [ { "name": "Compile", "kind": "Build" } ] }
        ]
    });
    let response = client
        .post(format!("{}/pipeline/create", base))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await.contains("Source"));

    let list: Vec<PipelineSummary> = client
        .get(format!("{}/pipeline/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_release_through_the_api() {
    let h = harness(ConcurrencyPolicy::Reject, FakeTarget::serving("v1")).await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    // Create
    let response = client
        .post(format!("{}/pipeline/create", base))
        .json(&release_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let pipeline: Pipeline = response.json().await.unwrap();
    assert_eq!(pipeline.stages.len(), 4);

    let list: Vec<PipelineSummary> = client
        .get(format!("{}/pipeline/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].stage_count, 4);

    // Trigger
    let response = client
        .post(format!("{}/pipeline/{}/trigger", base, pipeline.id))
        .json(&json!({ "revision": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let execution: ExecutionSummary = response.json().await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);

    let busy = client
        .post(format!("{}/pipeline/{}/trigger", base, pipeline.id))
        .json(&json!({ "revision": "def" }))
        .send()
        .await
        .unwrap();
    assert_eq!(busy.status(), StatusCode::CONFLICT);

    // Definitions cannot change under a running execution
    let response = client
        .put(format!("{}/pipeline/{}", base, pipeline.id))
        .json(&release_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let response = client
        .delete(format!("{}/pipeline/{}", base, pipeline.id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Approve
    let request = pending_approval(&h.engine, execution.id).await;
    let pending: Vec<ApprovalRequest> = client
        .get(format!("{}/approval/pending", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request.id);

    let response = client
        .post(format!("{}/approval/{}/resolve", base, request.id))
        .json(&json!({ "decision": "Approved", "comment": "  looks good  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let resolved: ApprovalRequest = response.json().await.unwrap();
    assert_eq!(resolved.comment.as_deref(), Some("looks good"));

    let again = client
        .post(format!("{}/approval/{}/resolve", base, request.id))
        .json(&json!({ "decision": "Rejected" }))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    // Wait for the cutover
    let mut view: Option<ExecutionStatusView> = None;
    for _ in 0..400 {
        let current: ExecutionStatusView = client
            .get(format!("{}/execution/{}", base, execution.id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if current.status != ExecutionStatus::Running {
            view = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let view = view.expect("execution did not finish");
    assert_eq!(view.status, ExecutionStatus::Succeeded);
    assert_eq!(view.failing_stage, None);

    let record: DeploymentRecord = client
        .get(format!("{}/deployment/web", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record.phase, DeploymentPhase::Stable);

    let missing = client
        .get(format!("{}/deployment/elsewhere", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let stop = client
        .post(format!("{}/execution/{}/stop", base, execution.id))
        .send()
        .await
        .unwrap();
    assert_eq!(stop.status(), StatusCode::CONFLICT);

    let history: Vec<ExecutionSummary> = client
        .get(format!("{}/execution/pipeline/{}", base, pipeline.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].revision, "abc");

    // Delete once idle
    let response = client
        .delete(format!("{}/pipeline/{}", base, pipeline.id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = client
        .get(format!("{}/pipeline/{}", base, pipeline.id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_resources_are_not_found() {
    let h = harness(ConcurrencyPolicy::Reject, FakeTarget::default()).await;
    let base = serve(&h).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/execution/42", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{}/approval/{}/resolve", base, uuid::Uuid::new_v4()))
        .json(&json!({ "decision": "Approved" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{}/pipeline/{}/trigger", base, uuid::Uuid::new_v4()))
        .json(&json!({ "revision": "r1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
