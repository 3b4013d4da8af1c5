//! Pipeline orchestrator: onboarding and every operator command.
//!
//! Each mutating command takes the user's lock, loads the whole context, runs
//! one or more stages plus the engine, and writes the context back.

mod locks;
mod onboarding;
mod progress;
mod rerouting;

pub use locks::UserLocks;
pub use onboarding::{OnboardingRequest, PipelineReport, PipelineStatus};
pub use progress::{
    ActionCompletion, ActionSummary, DiagnosticsReport, FeedbackReport, NextAction,
    RoadmapOverview, ValidationReport,
};
pub use rerouting::{RerouteOfferReport, RerouteReport, RevertReport};

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::agents::actions::{ActionStage, ValidationQuestionStage};
use crate::agents::feedback::EvaluationStage;
use crate::agents::path::RoadmapStage;
use crate::agents::readiness::ReadinessQuestionsStage;
use crate::agents::{AgentKind, AgentRunner, Stage};
use crate::config::PipelineConfig;
use crate::context::{ContextStore, UserContext, export_context};
use crate::error::{AgentError, PipelineError, Result, StoreError};
use crate::llm::LlmProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

/// One stage as seen in a command result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub agent: AgentKind,
    pub status: StageStatus,
    pub used_fallback: bool,
    pub error: Option<String>,
}

pub struct Orchestrator {
    store: Arc<dyn ContextStore>,
    runner: AgentRunner,
    config: PipelineConfig,
    locks: UserLocks,
}

impl Orchestrator {
    /// `llm` should already be throttled; the orchestrator adds no spacing of its own.
    pub fn new(llm: Arc<dyn LlmProvider>, store: Arc<dyn ContextStore>, config: PipelineConfig) -> Self {
        Self {
            runner: AgentRunner::new(llm),
            store,
            config,
            locks: UserLocks::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    // ── Stage factories ─────────────────────────────────────────────

    fn questions_stage(&self) -> ReadinessQuestionsStage {
        ReadinessQuestionsStage {
            question_count: self.config.diagnostic_questions,
        }
    }

    fn roadmap_stage(&self) -> RoadmapStage {
        RoadmapStage {
            max_steps: self.config.roadmap_steps,
        }
    }

    fn action_stage(&self) -> ActionStage {
        ActionStage {
            actions_per_step: self.config.actions_per_step,
        }
    }

    fn validation_stage(&self) -> ValidationQuestionStage {
        ValidationQuestionStage {
            question_count: self.config.validation_questions,
        }
    }

    fn evaluation_stage(&self) -> EvaluationStage {
        EvaluationStage {
            max_score: self.config.thresholds.max_score,
        }
    }

    // ── Shared plumbing ─────────────────────────────────────────────

    async fn load_existing(&self, user_id: &str) -> Result<UserContext> {
        self.store
            .load(user_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound {
                    user_id: user_id.to_string(),
                }
                .into()
            })
    }

    async fn pause(&self) {
        if !self.config.stage_delay.is_zero() {
            debug!(delay = ?self.config.stage_delay, "Pausing between stages");
            tokio::time::sleep(self.config.stage_delay).await;
        }
    }

    /// Pause (unless first), execute, record and save one stage of a sequence.
    async fn sequence_stage<S: Stage>(
        &self,
        stage: &S,
        ctx: &mut UserContext,
        params: &S::Params,
        stages: &mut Vec<StageReport>,
    ) -> std::result::Result<(), AgentError> {
        if !stages.is_empty() {
            self.pause().await;
        }
        match self.runner.execute(stage, ctx, params).await {
            Ok(result) => {
                stages.push(StageReport {
                    stage: result.stage,
                    agent: result.agent,
                    status: StageStatus::Completed,
                    used_fallback: result.used_fallback,
                    error: None,
                });
                self.store.save(ctx).await?;
                Ok(())
            }
            Err(e) => {
                stages.push(StageReport {
                    stage: S::NAME,
                    agent: S::AGENT,
                    status: StageStatus::Failed,
                    used_fallback: false,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    // ── Context commands ────────────────────────────────────────────

    /// Create a user with neutral defaults, or return the existing one.
    pub async fn create_user(&self, user_id: &str) -> Result<UserContext> {
        validate_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        Ok(self.store.load_or_create(user_id).await?)
    }

    pub async fn get_context(&self, user_id: &str) -> Result<UserContext> {
        self.load_existing(user_id).await
    }

    /// Explicit operator deletion. Returns `false` if there was nothing to delete.
    pub async fn delete_user(&self, user_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(user_id).await;
        let deleted = self.store.delete(user_id).await?;
        if deleted {
            info!(user_id, "Deleted user context");
        }
        Ok(deleted)
    }

    pub async fn list_users(&self) -> Result<Vec<String>> {
        Ok(self.store.list_users().await?)
    }

    /// Write a timestamped JSON copy of the context and return its path.
    pub async fn export_context(&self, user_id: &str) -> Result<PathBuf> {
        let ctx = self.load_existing(user_id).await?;
        Ok(export_context(&ctx, &self.config.export_dir).await?)
    }
}

fn validate_user_id(user_id: &str) -> std::result::Result<(), PipelineError> {
    if user_id.trim().is_empty() {
        return Err(PipelineError::InvalidInput("user id must not be empty".into()));
    }
    if user_id.len() > 128 {
        return Err(PipelineError::InvalidInput("user id is too long".into()));
    }
    Ok(())
}
