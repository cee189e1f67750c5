//! End-to-end job flow tests.
//!
//! Each test spins up the Axum API on a random port plus a real worker loop
//! against an in-memory store, then drives it over HTTP with reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use wastewise::api;
use wastewise::artifacts::JsonReportWriter;
use wastewise::config::WorkerConfig;
use wastewise::error::ExtractionError;
use wastewise::extraction::{DocumentExtractor, ExtractionRequest, ExtractionResponse};
use wastewise::skills::AiUsage;
use wastewise::skills::SkillRegistry;
use wastewise::skills::builtin::register_builtin;
use wastewise::store::LibSqlBackend;
use wastewise::worker::Worker;

/// Maximum time any job is allowed to take before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Returns the same invoice for every document.
struct StubExtractor;

#[async_trait]
impl DocumentExtractor for StubExtractor {
    async fn extract(
        &self,
        request: ExtractionRequest,
        _cancel: &CancellationToken,
    ) -> Result<ExtractionResponse, ExtractionError> {
        Ok(ExtractionResponse {
            record: json!({
                "source_file": request.document_name,
                "document_type": "invoice",
                "property_name": "Maple Court",
                "vendor_name": "Acme Waste",
                "invoice": {
                    "invoice_number": "INV-310",
                    "invoice_date": "2026-03-01",
                    "due_date": "2026-03-31",
                    "amount_due": "9800.00",
                    "subtotal": "9800.00",
                    "line_items": [
                        {"category": "base", "extended_amount": "3000.00"},
                        {"category": "disposal", "extended_amount": "4200.00"},
                        {"category": "contamination", "extended_amount": "600.00"},
                        {"category": "bulk", "extended_amount": "2000.00"}
                    ]
                }
            }),
            usage: AiUsage {
                input_tokens: 2_000,
                output_tokens: 500,
                cost_usd: dec!(0.0135),
            },
        })
    }
}

struct Harness {
    base: String,
    client: reqwest::Client,
    shutdown: CancellationToken,
    _reports: tempfile::TempDir,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start() -> Harness {
    let reports = tempfile::tempdir().unwrap();
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let mut registry = SkillRegistry::new();
    register_builtin(
        &mut registry,
        Some(Arc::new(StubExtractor)),
        Arc::new(JsonReportWriter::new(reports.path())),
    )
    .unwrap();
    let registry = Arc::new(registry);

    let shutdown = CancellationToken::new();
    let worker = Worker::new(
        store.clone(),
        Arc::clone(&registry),
        WorkerConfig {
            worker_id: "it-worker".to_string(),
            poll_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(50),
            ..WorkerConfig::default()
        },
    );
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await });
    }

    let app = api::routes(store, registry);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        shutdown,
        _reports: reports,
    }
}

impl Harness {
    async fn submit(&self, skill: &str, payload: Value) -> String {
        let response = self
            .client
            .post(format!("{}/api/jobs", self.base))
            .json(&json!({"skill_name": skill, "owner_id": "owner-1", "payload": payload}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "pending");
        body["job_id"].as_str().unwrap().to_string()
    }

    async fn job(&self, id: &str) -> Value {
        self.client
            .get(format!("{}/api/jobs/{id}", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll the status endpoint until the job is terminal.
    async fn wait_terminal(&self, id: &str) -> Value {
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                let job = self.job(id).await;
                if job["status"] == "completed" || job["status"] == "failed" {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }
}

#[tokio::test]
async fn unregistered_skill_fails_with_skill_not_found() {
    let harness = start().await;
    let id = harness.submit("unregistered-skill", json!({})).await;

    let job = harness.wait_terminal(&id).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["error"]["code"], "SkillNotFound");
    assert!(job["result"].is_null());
}

#[tokio::test]
async fn bulk_subscription_completes() {
    let harness = start().await;
    let id = harness
        .submit("bulk-subscription", json!({"avg_monthly_bulk": 800}))
        .await;

    let job = harness.wait_terminal(&id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100);
    assert!(job["error"].is_null());
    assert_eq!(job["result"]["strategy"], "subscription");
    assert_eq!(job["result"]["recommendations"][0]["annual_savings"], 4800.0);
}

#[tokio::test]
async fn invalid_payload_fails_validation() {
    let harness = start().await;
    let id = harness
        .submit("bulk-subscription", json!({"avg_monthly_bulk": -5}))
        .await;

    let job = harness.wait_terminal(&id).await;
    assert_eq!(job["error"]["code"], "ValidationError");
    assert!(
        job["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("avg_monthly_bulk")
    );
}

#[tokio::test]
async fn full_analysis_from_documents() {
    let harness = start().await;
    let pdf = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4 march");
    let id = harness
        .submit(
            "wastewise-analysis",
            json!({
                "property": {
                    "name": "Maple Court",
                    "units": 250,
                    "occupancy_pct": 92.0,
                    "status": "stabilized",
                    "has_compactor": true
                },
                "documents": [
                    {"name": "march-invoice.pdf", "media_type": "application/pdf", "content_base64": pdf}
                ],
                "financials": {
                    "monthly_cost": 9800.0,
                    "contamination_charges": 600.0,
                    "bulk_charges": 2000.0,
                    "avg_tons_per_haul": 4.5,
                    "overages_present": false
                },
                "compactor": {
                    "units": 250,
                    "container_size_cy": 30,
                    "annual_pickups": 52,
                    "avg_tons_per_pull": 4.5,
                    "base_haul_fee": 300.0,
                    "disposal_rate": 45.0
                }
            }),
        )
        .await;

    let job = harness.wait_terminal(&id).await;
    assert_eq!(job["status"], "completed", "{job}");
    let result = &job["result"];

    assert_eq!(result["extraction"]["invoices_added"], 1);
    assert_eq!(result["expense_summary"]["invoice_numbers"], json!(["INV-310"]));
    assert!(result["sub_skill_failures"].as_array().unwrap().is_empty());
    assert_eq!(result["skipped"], json!(["overage-strategy"]));

    let recs = result["recommendations"].as_array().unwrap();
    assert_eq!(recs.len(), 3);
    assert_eq!(recs[0]["priority"], 1);
    assert!(
        recs.windows(2)
            .all(|w| w[0]["annual_savings"].as_f64() >= w[1]["annual_savings"].as_f64())
    );
    assert!(
        result["headline"]
            .as_str()
            .unwrap()
            .starts_with("Potential to Reduce Annual Trash Expense by $")
    );

    let report = result["artifacts"][0]["location"].as_str().unwrap();
    let written: Value = serde_json::from_slice(&std::fs::read(report).unwrap()).unwrap();
    assert_eq!(written["property_name"], "Maple Court");
}

#[tokio::test]
async fn analysis_without_invoices_is_insufficient_data() {
    let harness = start().await;
    let id = harness
        .submit(
            "wastewise-analysis",
            json!({
                "property": {"name": "Empty Oaks", "units": 100, "occupancy_pct": 95.0},
                "invoices": [],
                "financials": {"monthly_cost": 4000.0}
            }),
        )
        .await;

    let job = harness.wait_terminal(&id).await;
    assert_eq!(job["error"]["code"], "InsufficientData");
}

#[tokio::test]
async fn cancelling_a_finished_job_is_a_noop() {
    let harness = start().await;
    let id = harness
        .submit("bulk-subscription", json!({"avg_monthly_bulk": 100}))
        .await;
    harness.wait_terminal(&id).await;

    let body: Value = harness
        .client
        .post(format!("{}/api/jobs/{id}/cancel", harness.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cancel_requested"], false);
    assert_eq!(harness.job(&id).await["status"], "completed");
}
