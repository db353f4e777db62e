//! Machine-operator HTTP contract.
//!
//! Operators run a small agent on their machines exposing three routes
//! under the promise's activation endpoint:
//!
//! - `POST /v1/activate` `{allocationId, user, specs}` → `{nodeId, endpoint}`
//! - `POST /v1/deactivate` `{allocationId}` → any response accepted
//! - `POST /v1/benchmark` `{jobId, image, timeout}` → a benchmark report
//!
//! The trait seam exists so engines are tested against in-process mocks;
//! `HttpMachineClient` is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gridpact_state::{BenchmarkResult, MachineSpec};

use crate::error::{ClientError, ClientResult};

/// Activation request body sent to the operator agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub allocation_id: String,
    pub user: String,
    pub specs: MachineSpec,
}

/// Successful activation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    pub node_id: String,
    pub endpoint: String,
}

/// Benchmark dispatch body sent to the operator agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRequest {
    pub job_id: String,
    /// Benchmark container image the agent must run.
    pub image: String,
    /// Seconds the agent may spend before reporting.
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeactivateRequest {
    allocation_id: String,
}

/// Outbound contract against a machine's operator agent.
#[async_trait]
pub trait MachineClient: Send + Sync {
    /// Activate an allocation. Non-2xx responses are activation failures.
    async fn activate(
        &self,
        endpoint: &str,
        req: &ActivateRequest,
        timeout: Duration,
    ) -> ClientResult<ActivateResponse>;

    /// Deactivate an allocation. Any response is accepted; only transport
    /// failures surface as errors.
    async fn deactivate(
        &self,
        endpoint: &str,
        allocation_id: &str,
        timeout: Duration,
    ) -> ClientResult<()>;

    /// Run a verification benchmark and return the machine's raw report.
    async fn run_benchmark(
        &self,
        endpoint: &str,
        req: &BenchmarkRequest,
        timeout: Duration,
    ) -> ClientResult<BenchmarkResult>;
}

/// reqwest-backed production client.
pub struct HttpMachineClient {
    http: reqwest::Client,
}

impl HttpMachineClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> ClientResult<reqwest::Response> {
        self.http
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout(timeout.as_millis() as u64)
                } else {
                    ClientError::Http(e.to_string())
                }
            })
    }
}

impl Default for HttpMachineClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MachineClient for HttpMachineClient {
    async fn activate(
        &self,
        endpoint: &str,
        req: &ActivateRequest,
        timeout: Duration,
    ) -> ClientResult<ActivateResponse> {
        let url = format!("{endpoint}/v1/activate");
        let resp = self.post_json(&url, req, timeout).await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        let parsed: ActivateResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        debug!(%url, node_id = %parsed.node_id, "activation accepted");
        Ok(parsed)
    }

    async fn deactivate(
        &self,
        endpoint: &str,
        allocation_id: &str,
        timeout: Duration,
    ) -> ClientResult<()> {
        let url = format!("{endpoint}/v1/deactivate");
        let body = DeactivateRequest {
            allocation_id: allocation_id.to_string(),
        };
        let resp = self.post_json(&url, &body, timeout).await?;
        if !resp.status().is_success() {
            warn!(%url, status = resp.status().as_u16(), "deactivate returned non-2xx");
        }
        Ok(())
    }

    async fn run_benchmark(
        &self,
        endpoint: &str,
        req: &BenchmarkRequest,
        timeout: Duration,
    ) -> ClientResult<BenchmarkResult> {
        let url = format!("{endpoint}/v1/benchmark");
        let resp = self.post_json(&url, req, timeout).await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        resp.json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}
