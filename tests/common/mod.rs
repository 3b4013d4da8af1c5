//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use career_nav::config::PipelineConfig;
use career_nav::context::{ContextStore, MemoryStore};
use career_nav::error::LlmError;
use career_nav::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use career_nav::orchestrator::{OnboardingRequest, Orchestrator};

pub const PASSING: &str = r#"{"individual_scores": [3, 3, 2], "total_score": 8,
    "ready_to_proceed": true, "feedback": "Clear, specific answers", "recommendation": "Move on"}"#;

pub const FAILING: &str = r#"{"individual_scores": [1, 0, 1], "total_score": 2,
    "ready_to_proceed": false, "feedback": "Answers are vague", "recommendation": "Redo the exercise"}"#;

pub const FAILURE_ANALYSIS: &str = r#"{
  "failure_type": "skill_gap",
  "failure_reasons": ["Statistics fundamentals are missing"],
  "salvageable_skills": ["Python", "SQL"],
  "alternative_paths": [
    {"new_target_role": "Data Analyst", "why_better_fit": "Uses SQL daily with less maths",
     "existing_skills_applicable": ["SQL", "Python"], "additional_skills_needed": ["Tableau", "SQL"],
     "success_probability": 0.8, "estimated_duration_months": 5}
  ],
  "adjusted_original_path": {"modifications": ["Add a statistics refresher"], "extended_timeline_months": 9},
  "next_steps": ["Pick an option"]
}"#;

/// Objective text of the action-generation prompt.
pub const ACTION_PROMPT: &str = "concrete, practical actions";
/// Objective text of the path-planning prompt.
pub const PATH_PROMPT: &str = "Design a step-by-step path";

/// Generation stub that answers by the objective of each prompt.
///
/// Evaluation and failure analysis get real JSON; every other stage gets
/// junk and falls back to its defaults.
pub struct StubLlm {
    evaluation: Mutex<&'static str>,
    fail_on: Mutex<Option<&'static str>>,
    pub calls: AtomicUsize,
}

impl StubLlm {
    pub fn new() -> Self {
        Self {
            evaluation: Mutex::new(PASSING),
            fail_on: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_evaluation(&self, reply: &'static str) {
        *self.evaluation.lock().unwrap() = reply;
    }

    /// Fail with a transport error on every prompt containing `marker`.
    pub fn fail_on(&self, marker: &'static str) {
        *self.fail_on.lock().unwrap() = Some(marker);
    }

    pub fn recover(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    fn reply_for(&self, prompt: &str) -> String {
        if prompt.contains("Score each answer") {
            self.evaluation.lock().unwrap().to_string()
        } else if prompt.contains("struggling on their current path") {
            FAILURE_ANALYSIS.to_string()
        } else {
            "not json".to_string()
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let failing = *self.fail_on.lock().unwrap();
        if failing.is_some_and(|marker| prompt.contains(marker)) {
            return Err(LlmError::Transport {
                provider: "stub".into(),
                reason: "connection reset".into(),
            });
        }
        Ok(CompletionResponse {
            content: self.reply_for(&prompt),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

pub fn test_config(export_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        stage_delay: Duration::ZERO,
        export_dir: export_dir.to_path_buf(),
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub llm: Arc<StubLlm>,
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StubLlm::new());
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        llm.clone(),
        store.clone() as Arc<dyn ContextStore>,
        test_config(dir.path()),
    ));
    Harness {
        llm,
        store,
        orchestrator,
        dir,
    }
}

pub fn onboarding(user_id: &str, goal: &str) -> OnboardingRequest {
    serde_json::from_value(serde_json::json!({
        "user_id": user_id,
        "raw_goal": goal,
        "profile": {"skills": ["Python", "SQL"], "experience": "Six months of internship"},
        "duration_weeks": 24
    }))
    .unwrap()
}

pub fn answers() -> Vec<String> {
    (1..=5).map(|i| format!("Detailed answer {i}")).collect()
}

/// Complete and pass every open action in the current step.
pub async fn pass_current_step(h: &Harness, user_id: &str) -> career_nav::orchestrator::ValidationReport {
    let overview = h.orchestrator.roadmap_status(user_id).await.unwrap();
    let mut last = None;
    for action in overview.actions.iter().filter(|a| !a.agent_satisfied) {
        h.orchestrator
            .complete_action(user_id, &action.action_id, 1.5)
            .await
            .unwrap();
        last = Some(
            h.orchestrator
                .submit_validation_answers(user_id, &action.action_id, answers())
                .await
                .unwrap(),
        );
    }
    last.expect("current step had no open actions")
}
