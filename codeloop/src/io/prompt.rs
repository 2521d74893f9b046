//! Prompt rendering for the generation and refinement calls.

use minijinja::{Environment, context};

use crate::core::task::AttemptRecord;
use crate::core::types::ExecutionOutcome;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");

/// System message for the generation call.
pub const GENERATION_SYSTEM_PROMPT: &str = "You are an expert Python developer. \
Produce a complete, executable Python script for the user's request through the \
generated_code tool. The script must be self-contained, must not wait for \
interactive input, and must place import statements and the executable body in \
their respective fields. Address any feedback from previous attempts before \
anything else.";

/// System message for the instruction-refinement call.
pub const REFINEMENT_SYSTEM_PROMPT: &str = "You are an expert prompt engineer. \
Rewrite the user's request into a clear, detailed prompt for a Python code \
generation model. The resulting prompt must ask for a standalone script with \
all necessary imports, a main entry point, and no interactive input.";

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)
            .expect("generate template should be valid");
        env.add_template("refine", REFINE_TEMPLATE)
            .expect("refine template should be valid");
        Self { env }
    }
}

/// Render the user message for a generation call.
///
/// `history` is the task's prior attempts, oldest first; `feedback` is the
/// most recent failure text the model must correct.
pub fn render_generation(
    instruction: &str,
    history: &[AttemptRecord],
    feedback: Option<&str>,
) -> String {
    let engine = PromptEngine::new();
    let template = engine
        .env
        .get_template("generate")
        .expect("generate template is registered");
    template
        .render(context! {
            instruction => instruction.trim(),
            history => non_empty(summarize_history(history)),
            feedback => feedback.map(str::trim).filter(|s| !s.is_empty()),
        })
        .expect("generate template should render")
}

/// Render the user message for the instruction-refinement call.
pub fn render_refinement(instruction: &str) -> String {
    let engine = PromptEngine::new();
    let template = engine
        .env
        .get_template("refine")
        .expect("refine template is registered");
    template
        .render(context! { instruction => instruction.trim() })
        .expect("refine template should render")
}

/// One line per prior attempt, oldest first.
fn summarize_history(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|attempt| format!("Attempt {}: {}", attempt.index, describe(attempt)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe(attempt: &AttemptRecord) -> String {
    if let Some(failure) = &attempt.generation_failure {
        return format!("generation failed ({failure})");
    }
    match &attempt.execution_outcome {
        ExecutionOutcome::Success(_) => "succeeded".to_string(),
        ExecutionOutcome::RuntimeError { message } => {
            format!("runtime error ({})", first_line(message))
        }
        ExecutionOutcome::Timeout => "timed out".to_string(),
        ExecutionOutcome::SandboxInfraError { message } => {
            format!("sandbox failure ({})", first_line(message))
        }
        ExecutionOutcome::NotRun => "not run".to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_code;

    fn runtime_error_attempt(index: u32, message: &str) -> AttemptRecord {
        AttemptRecord {
            index,
            generated_code: Some(sample_code("x = 1")),
            generation_failure: None,
            execution_outcome: ExecutionOutcome::RuntimeError {
                message: message.to_string(),
            },
            feedback_consumed: None,
        }
    }

    #[test]
    fn first_attempt_renders_without_history_or_feedback() {
        let rendered = render_generation("sum the primes below 100", &[], None);
        assert!(rendered.contains("sum the primes below 100"));
        assert!(!rendered.contains("PREVIOUS ATTEMPTS"));
        assert!(!rendered.contains("MOST RECENT FAILURE"));
    }

    #[test]
    fn retry_renders_history_and_feedback() {
        let history = vec![runtime_error_attempt(1, "NameError: total")];
        let rendered = render_generation(
            "sum the primes below 100",
            &history,
            Some("Your code failed to execute. Error:\nNameError: total"),
        );
        assert!(rendered.contains("Attempt 1: runtime error (NameError: total)"));
        assert!(rendered.contains("MOST RECENT FAILURE"));
        assert!(rendered.contains("NameError: total"));
    }

    #[test]
    fn refinement_prompt_carries_the_instruction() {
        let rendered = render_refinement("  plot a sine wave  ");
        assert!(rendered.contains("plot a sine wave"));
        assert!(!rendered.contains("  plot"));
    }
}
