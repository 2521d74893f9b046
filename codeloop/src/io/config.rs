//! Engine configuration: TOML file plus environment overrides.
//!
//! Binaries load the file, apply the environment, and pass the validated
//! value into the engine. Core modules never consult the environment.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Which backend runs generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// The isolated execution service.
    Service,
    /// A local interpreter. Refused at run time unless
    /// `allow_local_execution` is set.
    Local,
}

/// Top-level configuration (TOML).
///
/// Read once at startup and passed by value into the engine. Missing fields
/// default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Model identifier sent to the generation service.
    pub primary_model_name: String,

    /// Upper bound on generation+execution attempts per task.
    pub max_retry_iterations: u32,

    /// Per-execution wall-clock limit in seconds.
    pub max_code_timeout_secs: u64,

    /// Permit running generated code outside the isolated service.
    pub allow_local_execution: bool,

    /// Rewrite the raw instruction once before the loop starts.
    pub refine_instruction: bool,

    pub generator: GeneratorConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// OpenAI-compatible API root.
    pub base_url: String,
    pub api_key: String,
    /// Timeout for one generation request in seconds.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    /// Execution service API root (service backend).
    pub base_url: String,
    pub api_key: String,
    /// Interpreter for the local backend.
    pub python_bin: String,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_model_name: "gpt-4o".to_string(),
            max_retry_iterations: 10,
            max_code_timeout_secs: 240,
            allow_local_execution: false,
            refine_instruction: true,
            generator: GeneratorConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            request_timeout_secs: 120,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Service,
            base_url: "http://127.0.0.1:8081".to_string(),
            api_key: String::new(),
            python_bin: "python3".to_string(),
            output_limit_bytes: 100_000,
        }
    }
}

impl EngineConfig {
    pub fn max_code_timeout(&self) -> Duration {
        Duration::from_secs(self.max_code_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary_model_name.trim().is_empty() {
            return Err(anyhow!("primary_model_name must not be empty"));
        }
        if self.max_retry_iterations == 0 {
            return Err(anyhow!("max_retry_iterations must be > 0"));
        }
        if self.max_code_timeout_secs == 0 {
            return Err(anyhow!("max_code_timeout_secs must be > 0"));
        }
        if self.generator.base_url.trim().is_empty() {
            return Err(anyhow!("generator.base_url must not be empty"));
        }
        if self.generator.request_timeout_secs == 0 {
            return Err(anyhow!("generator.request_timeout_secs must be > 0"));
        }
        if self.sandbox.backend == SandboxBackend::Service
            && self.sandbox.base_url.trim().is_empty()
        {
            return Err(anyhow!("sandbox.base_url is required for the service backend"));
        }
        if self.sandbox.backend == SandboxBackend::Local
            && self.sandbox.python_bin.trim().is_empty()
        {
            return Err(anyhow!("sandbox.python_bin is required for the local backend"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Apply the process environment onto `cfg`.
///
/// Called by binaries after loading the file; unset or empty variables leave
/// the file/default values untouched.
pub fn apply_env_overrides(cfg: &mut EngineConfig) -> Result<()> {
    apply_overrides(cfg, |name| env::var(name).ok())
}

fn apply_overrides<F>(cfg: &mut EngineConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(value) = get("PRIMARY_MODEL_NAME") {
        cfg.primary_model_name = value;
    }
    if let Some(value) = get("MAX_RETRY_ITERATIONS") {
        cfg.max_retry_iterations = value
            .trim()
            .parse()
            .context("parse MAX_RETRY_ITERATIONS")?;
    }
    if let Some(value) = get("MAX_CODE_TIMEOUT") {
        cfg.max_code_timeout_secs = value.trim().parse().context("parse MAX_CODE_TIMEOUT")?;
    }
    if let Some(value) = get("ALLOW_LOCAL_EXECUTION") {
        cfg.allow_local_execution = parse_bool(&value).context("parse ALLOW_LOCAL_EXECUTION")?;
    }
    if let Some(value) = get("OPENAI_API_KEY") {
        cfg.generator.api_key = value;
    }
    if let Some(value) = get("OPENAI_BASE_URL") {
        cfg.generator.base_url = value;
    }
    if let Some(value) = get("SANDBOX_API_URL") {
        cfg.sandbox.base_url = value;
    }
    if let Some(value) = get("SANDBOX_API_KEY") {
        cfg.sandbox.api_key = value;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(anyhow!("expected a boolean, got {other:?}")),
    }
}
