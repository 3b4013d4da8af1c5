//! Stage agents.
//!
//! Every agent implements [`Stage`]: it checks prerequisites against the
//! context, builds a prompt, declares a typed output with a fallback, and knows
//! how to fold that output into the sub-records it owns. [`AgentRunner`] drives
//! one stage through the throttled generation service.

pub mod actions;
pub mod feedback;
pub mod goal;
pub mod json;
pub mod market;
pub mod path;
pub mod profiling;
pub mod prompts;
pub mod readiness;
pub mod rerouting;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::context::UserContext;
use crate::error::AgentError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// The eight agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Profiling,
    GoalInterpretation,
    Readiness,
    MarketAnalysis,
    PathPlanning,
    ActionRecommendation,
    FeedbackLearning,
    Rerouting,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Profiling => "profiling",
            Self::GoalInterpretation => "goal_interpretation",
            Self::Readiness => "readiness",
            Self::MarketAnalysis => "market_analysis",
            Self::PathPlanning => "path_planning",
            Self::ActionRecommendation => "action_recommendation",
            Self::FeedbackLearning => "feedback_learning",
            Self::Rerouting => "rerouting",
        };
        write!(f, "{s}")
    }
}

/// An upstream stage whose output is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Prerequisite {
    ProfileAnalysis,
    GoalInterpretation,
    ReadinessAssessment,
    MarketAnalysis,
    PathPlanning,
    RoadmapGeneration,
    CompletedActions,
    ValidationQuestions,
}

impl std::fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProfileAnalysis => "profile analysis",
            Self::GoalInterpretation => "goal interpretation",
            Self::ReadinessAssessment => "readiness assessment",
            Self::MarketAnalysis => "market analysis",
            Self::PathPlanning => "path planning",
            Self::RoadmapGeneration => "roadmap generation",
            Self::CompletedActions => "completed actions",
            Self::ValidationQuestions => "validation questions",
        };
        write!(f, "{s}")
    }
}

/// Fail with `MissingPrerequisite` unless `present`.
pub(crate) fn require(present: bool, what: Prerequisite) -> Result<(), AgentError> {
    if present {
        Ok(())
    } else {
        Err(AgentError::MissingPrerequisite(what))
    }
}

/// Prompt text and sampling limits for one call.
#[derive(Debug, Clone)]
pub struct StagePrompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One stage contract.
pub trait Stage: Send + Sync {
    /// Extra inputs not found in the context.
    type Params: Send + Sync;
    /// The schema the generation service must return.
    type Output: DeserializeOwned + Serialize + Send;

    /// Owning agent.
    const AGENT: AgentKind;
    /// Stage name used in logs and reports.
    const NAME: &'static str;

    /// Fail with `MissingPrerequisite` if an upstream sub-record is absent.
    fn check(&self, ctx: &UserContext, params: &Self::Params) -> Result<(), AgentError>;

    fn prompt(&self, ctx: &UserContext, params: &Self::Params) -> StagePrompt;

    /// Reject outputs that parsed but are unusable (e.g. an empty step list).
    fn accept(&self, _output: &Self::Output) -> bool {
        true
    }

    /// Substitute when the response cannot be turned into an acceptable output.
    fn fallback(&self, ctx: &UserContext, params: &Self::Params) -> Self::Output;

    /// Fold the output into the sub-records this stage owns.
    fn apply(&self, ctx: &mut UserContext, output: &Self::Output, params: &Self::Params);
}

/// Outcome of one successful stage run.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult<T> {
    pub agent: AgentKind,
    pub stage: &'static str,
    pub payload: T,
    pub context_updated: bool,
    pub used_fallback: bool,
}

/// Drives stages against the generation service.
///
/// Loading and saving belong to the caller, which also holds the user's lock.
#[derive(Clone)]
pub struct AgentRunner {
    llm: Arc<dyn LlmProvider>,
}

impl AgentRunner {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Run one stage on an already loaded context. The caller saves.
    ///
    /// On `Err` the context has not been touched.
    pub async fn execute<S: Stage>(
        &self,
        stage: &S,
        ctx: &mut UserContext,
        params: &S::Params,
    ) -> Result<StageResult<S::Output>, AgentError> {
        stage.check(ctx, params)?;

        let agent = S::AGENT.to_string();
        let prompt = stage.prompt(ctx, params);
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompt.system),
            ChatMessage::user(prompt.user),
        ])
        .with_temperature(prompt.temperature)
        .with_max_tokens(prompt.max_tokens)
        .with_agent(agent.as_str());

        let response = self.llm.complete(request).await?;

        let (input_cost, output_cost) = self.llm.cost_per_token();
        let cost = input_cost * Decimal::from(response.input_tokens)
            + output_cost * Decimal::from(response.output_tokens);
        ctx.metadata
            .record_usage(&agent, response.input_tokens, response.output_tokens, cost);

        let (output, used_fallback) = match json::parse_output::<S::Output>(&response.content) {
            Ok(output) if stage.accept(&output) => (output, false),
            Ok(_) => {
                warn!(user_id = %ctx.user_id, stage = S::NAME, "Generated output was unusable, using fallback");
                (stage.fallback(ctx, params), true)
            }
            Err(reason) => {
                warn!(user_id = %ctx.user_id, stage = S::NAME, %reason, "Failed to parse generated output, using fallback");
                (stage.fallback(ctx, params), true)
            }
        };

        stage.apply(ctx, &output, params);

        let count = ctx.metadata.record_interaction(&agent);
        if used_fallback {
            ctx.metadata.fallbacks += 1;
        }
        ctx.metadata.record_event(
            S::NAME,
            if used_fallback {
                format!("{agent} completed with fallback")
            } else {
                format!("{agent} completed")
            },
        );
        ctx.touch();

        info!(
            user_id = %ctx.user_id,
            agent = %agent,
            stage = S::NAME,
            interactions = count,
            used_fallback,
            "Stage completed"
        );

        Ok(StageResult {
            agent: S::AGENT,
            stage: S::NAME,
            payload: output,
            context_updated: true,
            used_fallback,
        })
    }
}

/// Clamp a generated probability/score into `[0, 1]`, accepting percentages.
pub(crate) fn unit_interval(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let v = if value > 1.0 { value / 100.0 } else { value };
    v.clamp(0.0, 1.0)
}


#[cfg(test)]
mod tests {
    use super::testing::{ScriptedLlm, run_stage};
    use super::*;
    use crate::agents::goal::{GoalParams, GoalStage};
    use crate::agents::path::{PathParams, PathStage};
    use crate::context::{ContextStore, MemoryStore};
    use crate::error::LlmError;

    fn runner(llm: ScriptedLlm) -> (AgentRunner, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (AgentRunner::new(Arc::new(llm)), store)
    }

    #[tokio::test]
    async fn missing_goal_blocks_path_planning_without_mutation() {
        let (runner, store) = runner(ScriptedLlm::new(vec![]));
        let err = run_stage(&runner, store.as_ref(), &PathStage, "u1", &PathParams::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AgentError::MissingPrerequisite(Prerequisite::GoalInterpretation)
        ));
        assert!(err.to_string().contains("goal interpretation"));

        let ctx = store.load("u1").await.unwrap().unwrap();
        assert!(ctx.active_path.target_role.is_none());
        assert!(ctx.active_path.steps.is_empty());
    }

    #[tokio::test]
    async fn unparsable_output_uses_fallback_and_counts_interaction() {
        let (runner, store) = runner(ScriptedLlm::new(vec!["definitely not json"]));
        let params = GoalParams {
            raw_goal: "I want to be a data analyst".into(),
            duration_weeks: Some(24),
        };
        let result = run_stage(&runner, store.as_ref(), &GoalStage, "u2", &params).await.unwrap();
        assert!(result.used_fallback);

        let ctx = store.load("u2").await.unwrap().unwrap();
        let interpreted = ctx.goal.interpreted.unwrap();
        assert_eq!(interpreted.role_title, "I want to be a data analyst");
        assert_eq!(ctx.metadata.agent_interactions["goal_interpretation"], 1);
        assert_eq!(ctx.metadata.fallbacks, 1);
        assert_eq!(ctx.metadata.token_usage["goal_interpretation"].input_tokens, 100);
    }

    #[tokio::test]
    async fn transport_error_leaves_context_untouched() {
        let (runner, store) = runner(ScriptedLlm::failing(LlmError::Transport {
            provider: "scripted".into(),
            reason: "connection refused".into(),
        }));
        let params = GoalParams {
            raw_goal: "Become a UX designer".into(),
            duration_weeks: None,
        };
        let err = run_stage(&runner, store.as_ref(), &GoalStage, "u3", &params).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::Transport { .. })));

        let ctx = store.load("u3").await.unwrap().unwrap();
        assert!(ctx.goal.interpreted.is_none());
        assert!(ctx.metadata.agent_interactions.is_empty());
    }

    #[test]
    fn unit_interval_accepts_percentages() {
        assert_eq!(unit_interval(0.7), 0.7);
        assert_eq!(unit_interval(70.0), 0.7);
        assert_eq!(unit_interval(-1.0), 0.0);
        assert_eq!(unit_interval(f64::NAN), 0.0);
    }
}
