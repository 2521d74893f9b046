//! Sandbox execution adapters.
//!
//! [`SandboxExecutor`] returns outcome data rather than errors: every failure
//! mode is a value the classifier can reason about. Infrastructure faults are
//! kept distinct from faults of the executed code itself.

use std::fs;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::{ExecutionOutcome, ExecutionSuccess};
use crate::io::config::SandboxConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::snippet;

/// Abstraction over execution backends.
pub trait SandboxExecutor {
    /// Run `code` with a hard wall-clock limit of `timeout`.
    ///
    /// Must not block past the limit: an overrunning execution is reported as
    /// [`ExecutionOutcome::Timeout`]. `cancel` lets an implementation abandon
    /// an in-flight execution early; the engine discards the outcome of a
    /// cancelled call.
    fn execute(&self, code: &str, timeout: Duration, cancel: &CancelToken) -> ExecutionOutcome;
}

/// Client for the isolated execution service.
///
/// Each request provisions a fresh sandbox session that the service tears
/// down afterwards; no files or processes persist between calls.
pub struct SandboxServiceExecutor {
    http: reqwest::blocking::Client,
    config: SandboxConfig,
}

/// Slack added to the HTTP deadline so a service-side timeout verdict can
/// still reach us.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

impl SandboxServiceExecutor {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        // No client-wide timeout: the per-request deadline depends on the
        // execution timeout.
        let http = reqwest::blocking::Client::builder()
            .build()
            .context("build http client")?;
        Ok(Self { http, config })
    }
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    error: Option<ExecuteError>,
}

#[derive(Debug, Deserialize)]
struct ExecuteError {
    kind: String,
    #[serde(default)]
    message: String,
}

impl SandboxExecutor for SandboxServiceExecutor {
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
    fn execute(&self, code: &str, timeout: Duration, _cancel: &CancelToken) -> ExecutionOutcome {
        let url = format!("{}/executions", self.config.base_url.trim_end_matches('/'));
        let mut request = self
            .http
            .post(url)
            .timeout(timeout + REQUEST_GRACE)
            .json(&ExecuteRequest {
                code,
                timeout_secs: timeout.as_secs(),
            });
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                warn!("sandbox request exceeded the execution deadline");
                return ExecutionOutcome::Timeout;
            }
            Err(err) => {
                return ExecutionOutcome::SandboxInfraError {
                    message: format!("sandbox service unreachable: {err}"),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return ExecutionOutcome::SandboxInfraError {
                message: format!("sandbox service returned {status}: {}", snippet(&text, 500)),
            };
        }
        let body: ExecuteResponse = match response.json() {
            Ok(body) => body,
            Err(err) => {
                return ExecutionOutcome::SandboxInfraError {
                    message: format!("undecodable sandbox response: {err}"),
                };
            }
        };
        debug!(has_error = body.error.is_some(), "sandbox responded");
        map_response(body)
    }
}

fn map_response(body: ExecuteResponse) -> ExecutionOutcome {
    match body.error {
        None => ExecutionOutcome::Success(ExecutionSuccess {
            stdout: body.stdout,
            value: body.value,
        }),
        Some(error) => match error.kind.as_str() {
            "runtime" => ExecutionOutcome::RuntimeError {
                message: error.message,
            },
            "timeout" => ExecutionOutcome::Timeout,
            other => ExecutionOutcome::SandboxInfraError {
                message: format!("{other}: {}", error.message),
            },
        },
    }
}

/// Runs code with a local interpreter in a throwaway scratch directory.
///
/// Only usable when the configuration explicitly allows execution outside the
/// isolated service; otherwise every call is refused up front.
pub struct LocalProcessExecutor {
    allow_local_execution: bool,
    python_bin: String,
    output_limit_bytes: usize,
}

impl LocalProcessExecutor {
    pub fn new(config: &SandboxConfig, allow_local_execution: bool) -> Self {
        Self {
            allow_local_execution,
            python_bin: config.python_bin.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl SandboxExecutor for LocalProcessExecutor {
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
    fn execute(&self, code: &str, timeout: Duration, cancel: &CancelToken) -> ExecutionOutcome {
        if !self.allow_local_execution {
            warn!("local execution requested while disabled by policy");
            return ExecutionOutcome::SandboxInfraError {
                message: "local execution is disabled by policy \
                          (set allow_local_execution to permit it)"
                    .to_string(),
            };
        }

        let workdir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => return infra(format!("create scratch dir: {err}")),
        };
        let script_path = workdir.path().join("main.py");
        if let Err(err) = fs::write(&script_path, code) {
            return infra(format!("write script: {err}"));
        }

        let mut cmd = Command::new(&self.python_bin);
        cmd.arg(&script_path).current_dir(workdir.path());
        let output =
            match run_command_with_timeout(cmd, timeout, self.output_limit_bytes, cancel) {
                Ok(output) => output,
                Err(err) => return infra(format!("run interpreter: {err:#}")),
            };

        // The engine aborts right after a cancelled call; the value is discarded.
        if output.cancelled {
            return ExecutionOutcome::NotRun;
        }
        if output.timed_out {
            return ExecutionOutcome::Timeout;
        }
        if output.status.success() {
            ExecutionOutcome::Success(ExecutionSuccess {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                value: None,
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).into_owned()
            } else {
                stderr.into_owned()
            };
            ExecutionOutcome::RuntimeError { message }
        }
    }
}

fn infra(message: String) -> ExecutionOutcome {
    ExecutionOutcome::SandboxInfraError { message }
}
