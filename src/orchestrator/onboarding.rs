use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Orchestrator, StageReport, validate_user_id};
use crate::agents::actions::ActionParams;
use crate::agents::goal::{GoalParams, GoalStage};
use crate::agents::market::{MarketParams, MarketStage};
use crate::agents::path::{PathParams, PathStage};
use crate::agents::profiling::ProfilingStage;
use crate::context::UserContext;
use crate::context::model::ProfileInputs;
use crate::engine::reroute::deviation_signal;
use crate::error::{AgentError, PipelineError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingRequest {
    pub user_id: String,
    pub raw_goal: String,
    #[serde(default)]
    pub profile: ProfileInputs,
    #[serde(default)]
    pub duration_weeks: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Error,
}

/// Result of an onboarding run. Stages that succeeded before a failure stay applied.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub user_id: String,
    pub status: PipelineStatus,
    pub stages: Vec<StageReport>,
    pub error: Option<String>,
    pub target_role: Option<String>,
    pub reroute_recommended: Option<String>,
}

impl Orchestrator {
    /// Profile → goal → readiness questions → market → path → roadmap → first actions.
    pub async fn run_onboarding(&self, request: OnboardingRequest) -> Result<PipelineReport> {
        validate_user_id(&request.user_id)?;
        if request.raw_goal.trim().is_empty() {
            return Err(PipelineError::InvalidInput("goal must not be empty".into()).into());
        }

        let _guard = self.locks.acquire(&request.user_id).await;
        let mut ctx = self.store.load_or_create(&request.user_id).await?;
        info!(user_id = %ctx.user_id, goal = %request.raw_goal, "Onboarding started");

        let mut stages = Vec::new();
        let outcome = self.onboard(&mut ctx, &request, &mut stages).await;

        let (status, error) = match outcome {
            Ok(()) => {
                info!(user_id = %ctx.user_id, stages = stages.len(), "Onboarding completed");
                (PipelineStatus::Completed, None)
            }
            Err(e) => {
                warn!(user_id = %ctx.user_id, error = %e, completed = stages.len().saturating_sub(1), "Onboarding aborted");
                (PipelineStatus::Error, Some(e.to_string()))
            }
        };

        Ok(PipelineReport {
            user_id: ctx.user_id.clone(),
            status,
            stages,
            error,
            target_role: ctx.active_path.target_role.clone(),
            reroute_recommended: deviation_signal(&ctx, self.config.low_confidence),
        })
    }

    async fn onboard(
        &self,
        ctx: &mut UserContext,
        request: &OnboardingRequest,
        stages: &mut Vec<StageReport>,
    ) -> std::result::Result<(), AgentError> {
        let goal = GoalParams {
            raw_goal: request.raw_goal.trim().to_string(),
            duration_weeks: request.duration_weeks,
        };

        self.sequence_stage(&ProfilingStage, ctx, &request.profile, stages).await?;
        self.sequence_stage(&GoalStage, ctx, &goal, stages).await?;
        self.sequence_stage(&self.questions_stage(), ctx, &(), stages).await?;
        self.sequence_stage(&MarketStage, ctx, &MarketParams::default(), stages).await?;
        self.sequence_stage(&PathStage, ctx, &PathParams::default(), stages).await?;
        self.sequence_stage(&self.roadmap_stage(), ctx, &(), stages).await?;
        self.sequence_stage(&self.action_stage(), ctx, &ActionParams::default(), stages).await
    }
}
