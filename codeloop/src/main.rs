//! Command-line front end for the codeloop engine.
//!
//! Loads configuration (TOML file, `.env`, environment overrides), builds the
//! adapters, and drives [`WorkflowEngine`] synchronously.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use codeloop::cancel::CancelToken;
use codeloop::core::task::{AttemptRecord, Task, TaskStatus};
use codeloop::core::types::ExecutionOutcome;
use codeloop::engine::WorkflowEngine;
use codeloop::io::config::{
    EngineConfig, SandboxBackend, apply_env_overrides, load_config, write_config,
};
use codeloop::io::generator::{CodeGenerator, GenerateRequest, OpenAiGenerator};
use codeloop::io::sandbox::{LocalProcessExecutor, SandboxServiceExecutor};
use codeloop::logging;

#[derive(Parser)]
#[command(
    name = "codeloop",
    version,
    about = "Generate, execute, and self-correct code from a natural-language instruction"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "codeloop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full generate-execute-retry loop for an instruction.
    Run {
        instruction: String,
        /// Write the final script to this path on success.
        #[arg(long)]
        save: Option<PathBuf>,
        /// Execute with the local interpreter instead of the sandbox service.
        #[arg(long)]
        local: bool,
    },
    /// Generate code for an instruction without executing it.
    Generate { instruction: String },
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            instruction,
            save,
            local,
        } => {
            let config = load_validated_config(&cli.config)?;
            cmd_run(config, &instruction, save.as_deref(), local)
        }
        Command::Generate { instruction } => {
            let config = load_validated_config(&cli.config)?;
            cmd_generate(config, &instruction)
        }
        Command::Init { force } => cmd_init(&cli.config, force),
    }
}

fn load_validated_config(path: &Path) -> Result<EngineConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn cmd_run(
    mut config: EngineConfig,
    instruction: &str,
    save: Option<&Path>,
    local: bool,
) -> Result<()> {
    if local {
        config.sandbox.backend = SandboxBackend::Local;
    }
    let generator = OpenAiGenerator::new(config.primary_model_name.clone(), config.generator.clone())?;
    let cancel = CancelToken::new();

    let task = match config.sandbox.backend {
        SandboxBackend::Service => {
            let sandbox = SandboxServiceExecutor::new(config.sandbox.clone())?;
            WorkflowEngine::new(generator, sandbox, config).run(instruction, &cancel)
        }
        SandboxBackend::Local => {
            let sandbox = LocalProcessExecutor::new(&config.sandbox, config.allow_local_execution);
            WorkflowEngine::new(generator, sandbox, config).run(instruction, &cancel)
        }
    };

    print_summary(&task);

    if let (Some(path), Some(output)) = (save, &task.final_output) {
        let mut source = output.code.full_source();
        source.push('\n');
        fs::write(path, source).with_context(|| format!("write {}", path.display()))?;
        println!("saved final script to {}", path.display());
    }

    if task.status != TaskStatus::Succeeded {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_generate(config: EngineConfig, instruction: &str) -> Result<()> {
    let generator = OpenAiGenerator::new(config.primary_model_name.clone(), config.generator.clone())?;

    let effective = if config.refine_instruction {
        match generator.refine(instruction) {
            Ok(refined) => refined,
            Err(failure) => {
                tracing::warn!(%failure, "instruction refinement failed, using raw instruction");
                instruction.to_string()
            }
        }
    } else {
        instruction.to_string()
    };

    let request = GenerateRequest {
        instruction: &effective,
        history: &[],
        feedback: None,
    };
    match generator.generate(&request) {
        Ok(code) => {
            println!("# {}", code.task_description);
            println!();
            println!("{}", code.full_source());
            Ok(())
        }
        Err(failure) => bail!("generation failed: {failure}"),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn print_summary(task: &Task) {
    println!("status: {}", task.status);
    println!("attempts: {}", task.attempts.len());
    if let Some(ms) = task.duration_ms {
        println!("duration: {:.1}s", ms as f64 / 1000.0);
    }
    for attempt in &task.attempts {
        println!("  attempt {}: {}", attempt.index, describe_attempt(attempt));
    }

    if let Some(output) = &task.final_output {
        println!();
        println!("--- final script ---");
        println!("{}", output.code.full_source());
        println!("--- output ---");
        print!("{}", output.result.stdout);
        if !output.result.stdout.ends_with('\n') {
            println!();
        }
        if let Some(value) = &output.result.value {
            println!("--- result ---");
            println!("{value}");
        }
    }
    if let Some(failure) = &task.failure {
        println!();
        match failure {
            codeloop::core::task::FailureReason::ExhaustedRetries { attempts } => {
                println!("failed: retry budget exhausted after {attempts} attempts");
            }
            codeloop::core::task::FailureReason::Fatal { message } => {
                println!("failed: {message}");
            }
        }
    }
}

fn describe_attempt(attempt: &AttemptRecord) -> String {
    if let Some(failure) = &attempt.generation_failure {
        return format!("generation failed ({failure})");
    }
    match &attempt.execution_outcome {
        ExecutionOutcome::Success(_) => "executed successfully".to_string(),
        ExecutionOutcome::RuntimeError { message } => {
            let first = message.lines().next().unwrap_or("").trim();
            format!("runtime error ({first})")
        }
        ExecutionOutcome::Timeout => "timed out".to_string(),
        ExecutionOutcome::SandboxInfraError { message } => format!("sandbox failure ({message})"),
        ExecutionOutcome::NotRun => "not run".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from(["codeloop", "run", "sum the primes below 100"]);
        match cli.command {
            Command::Run {
                instruction,
                save,
                local,
            } => {
                assert_eq!(instruction, "sum the primes below 100");
                assert!(save.is_none());
                assert!(!local);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parse_run_with_save_and_local() {
        let cli = Cli::parse_from([
            "codeloop",
            "run",
            "plot a sine wave",
            "--save",
            "out.py",
            "--local",
        ]);
        match cli.command {
            Command::Run { save, local, .. } => {
                assert_eq!(save, Some(PathBuf::from("out.py")));
                assert!(local);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["codeloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }
}
