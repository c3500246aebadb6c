//! Device gateway client
//!
//! The apply and verify stages reach the device automation gateway over HTTP.
//! The gateway owns the actual device protocol (sessions, credentials,
//! vendor quirks); this client only shapes requests and surfaces failures.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use switchyard_core::domain::rollout::{PostVerification, Rollout};
use thiserror::Error;

use crate::launch::executor::{
    CheckReport, CommandOutput, ConfigApplier, CriteriaDiffEvaluator, PostCheckRunner,
    PreCheckRunner, SimulationEvaluator, StageExecutors,
};

/// Errors that can occur when talking to the device gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Gateway returned an error status code
    #[error("gateway error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the gateway
        message: String,
    },

    /// Failed to parse response
    #[error("failed to parse gateway response: {0}")]
    ParseError(String),
}

impl GatewayError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }
}

/// HTTP client for the device automation gateway
#[derive(Debug, Clone)]
pub struct DeviceGatewayClient {
    /// Base URL of the gateway (e.g. "http://localhost:9090")
    base_url: String,
    client: Client,
}

impl DeviceGatewayClient {
    /// Create a new gateway client
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new gateway client with a custom HTTP client
    ///
    /// This allows configuring timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run verification commands on a set of devices
    ///
    /// POST /commands/run
    pub async fn run_commands(
        &self,
        devices: &[String],
        commands: &[String],
    ) -> std::result::Result<Vec<CommandResult>, GatewayError> {
        let response = self
            .client
            .post(format!("{}/commands/run", self.base_url))
            .json(&RunCommandsRequest { devices, commands })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Back up the running configuration of a set of devices
    ///
    /// POST /config/backup
    pub async fn backup_configs(
        &self,
        devices: &[String],
    ) -> std::result::Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}/config/backup", self.base_url))
            .json(&BackupRequest { devices })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Push configuration lines to a set of devices
    ///
    /// POST /config/push
    pub async fn push_config(
        &self,
        devices: &[String],
        lines: &[String],
        reboot: bool,
    ) -> std::result::Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}/config/push", self.base_url))
            .json(&PushConfigRequest {
                devices,
                lines,
                reboot,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Dry-run configuration lines against the gateway's simulator
    ///
    /// POST /config/simulate
    pub async fn simulate(
        &self,
        lines: &[String],
    ) -> std::result::Result<SimulationResult, GatewayError> {
        let response = self
            .client
            .post(format!("{}/config/simulate", self.base_url))
            .json(&SimulateRequest { lines })
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<T, GatewayError> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::api_error(status.as_u16(), error_text));
        }

        response.json().await.map_err(|e| {
            GatewayError::ParseError(format!("Failed to parse JSON response: {}", e))
        })
    }

    async fn handle_empty_response(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<(), GatewayError> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
struct RunCommandsRequest<'a> {
    devices: &'a [String],
    commands: &'a [String],
}

#[derive(Debug, Serialize)]
struct BackupRequest<'a> {
    devices: &'a [String],
}

#[derive(Debug, Serialize)]
struct PushConfigRequest<'a> {
    devices: &'a [String],
    lines: &'a [String],
    reboot: bool,
}

#[derive(Debug, Serialize)]
struct SimulateRequest<'a> {
    lines: &'a [String],
}

/// Outcome of one command on one device
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResult {
    pub device: String,
    pub command: String,
    pub success: bool,
    pub output: String,
}

/// Verdict of a configuration dry run
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationResult {
    pub status: String,
    pub detail: Option<String>,
}

// =============================================================================
// Gateway-backed Stage Executors
// =============================================================================

/// One gateway client serving every remote stage seam
#[derive(Clone)]
pub struct GatewayStageExecutor {
    client: DeviceGatewayClient,
}

impl GatewayStageExecutor {
    pub fn new(client: DeviceGatewayClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PreCheckRunner for GatewayStageExecutor {
    async fn run_pre_check(&self, rollout: &Rollout) -> Result<()> {
        let Some(pre) = &rollout.pre_verification else {
            // Nothing configured to verify.
            return Ok(());
        };

        if pre.backup_configs {
            self.client.backup_configs(&rollout.target_devices).await?;
        }

        let results = self
            .client
            .run_commands(&rollout.target_devices, &pre.check_commands)
            .await?;

        for result in results {
            if !result.success {
                anyhow::bail!(
                    "command '{}' failed on {}: {}",
                    result.command,
                    result.device,
                    result.output
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ConfigApplier for GatewayStageExecutor {
    async fn apply_config(&self, rollout: &Rollout) -> Result<()> {
        self.client
            .push_config(
                &rollout.target_devices,
                &rollout.apply_settings.device_config,
                rollout.apply_settings.reboot_devices,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PostCheckRunner for GatewayStageExecutor {
    async fn run_post_check(
        &self,
        rollout: &Rollout,
        verification: &PostVerification,
    ) -> Result<CheckReport> {
        let results = self
            .client
            .run_commands(&rollout.target_devices, &verification.check_commands)
            .await?;

        let mut report = CheckReport::default();
        for result in results {
            if !result.success {
                anyhow::bail!(
                    "command '{}' failed on {}: {}",
                    result.command,
                    result.device,
                    result.output
                );
            }
            report.outputs.push(CommandOutput {
                device: result.device,
                command: result.command,
                output: result.output,
            });
        }

        Ok(report)
    }
}

#[async_trait]
impl SimulationEvaluator for GatewayStageExecutor {
    async fn simulate(&self, config_lines: &[String]) -> Result<()> {
        let result = self.client.simulate(config_lines).await?;
        if result.status != "SUCCESS" {
            anyhow::bail!(
                "simulation returned status {}{}",
                result.status,
                result
                    .detail
                    .map(|d| format!(": {d}"))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Build the production executor set on top of one gateway client
pub fn gateway_executors(client: DeviceGatewayClient) -> StageExecutors {
    let executor = Arc::new(GatewayStageExecutor::new(client));
    StageExecutors {
        pre_check: executor.clone(),
        applier: executor.clone(),
        post_check: executor.clone(),
        simulation: executor,
        diff: Arc::new(CriteriaDiffEvaluator),
    }
}
