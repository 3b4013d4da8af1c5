//! Shared prompt scaffolding for stage agents.

use serde_json::Value;

use super::StagePrompt;

const SYSTEM_PREAMBLE: &str = "You are part of a career guidance system that builds and revises \
personal career roadmaps for students and early-career professionals. Be specific and realistic. \
Respond with a single JSON object that matches the requested schema exactly. \
Do not add commentary before or after the JSON.";

/// Build a stage prompt from an objective, the stage input, and a schema example.
pub fn stage_prompt(
    role: &str,
    objective: &str,
    input: &Value,
    schema: &str,
    temperature: f32,
    max_tokens: u32,
) -> StagePrompt {
    let input = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
    StagePrompt {
        system: format!("{SYSTEM_PREAMBLE}\n\nYour role: {role}"),
        user: format!(
            "## Objective\n{objective}\n\n## Input\n{input}\n\n## Output schema\nReturn JSON shaped like:\n{schema}"
        ),
        temperature,
        max_tokens,
    }
}
