//! Commands that move a student along their roadmap.

use serde::Serialize;
use tracing::{info, warn};

use super::Orchestrator;
use crate::agents::actions::ActionParams;
use crate::agents::feedback::{EvaluationParams, FeedbackStage};
use crate::agents::readiness::ReadinessAssessmentStage;
use crate::agents::rerouting::FailureAnalysisStage;
use crate::context::UserContext;
use crate::context::model::{
    Action, ActionStatus, DeviationRisk, PathStatus, ProgressFeedback, ReadinessVerdict,
    RoadmapStatus,
};
use crate::engine::progression::{
    StepTransition, ValidationOutcome, evaluate_current_step, mark_action_complete,
    record_evaluation, record_manual_score,
};
use crate::engine::reroute::{DetectionTrigger, RerouteOffer, RerouteState, detect, deviation_signal};
use crate::error::{AgentError, PipelineError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub verdict: Option<ReadinessVerdict>,
    pub confidence_score: Option<f64>,
    pub deviation_risk: Option<DeviationRisk>,
    pub key_gaps: Vec<String>,
    pub used_fallback: bool,
    pub reroute_recommended: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionCompletion {
    pub action_id: String,
    pub step_number: u32,
    pub questions: Vec<String>,
    pub used_fallback: bool,
    pub time_spent_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub action_id: String,
    pub score: u8,
    pub feedback: String,
    pub outcome: ValidationOutcome,
    pub step: Option<StepTransition>,
    /// Actions generated for the step that just became current.
    pub new_actions: usize,
    /// Options offered when repeated failure triggered a reroute.
    pub reroute_offer: Option<RerouteOffer>,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackReport {
    pub feedback: Option<ProgressFeedback>,
    pub used_fallback: bool,
    pub reroute_recommended: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextAction {
    pub step_number: u32,
    pub step_title: String,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    pub action_id: String,
    pub title: String,
    pub status: ActionStatus,
    pub agent_satisfied: bool,
    pub attempts: u32,
    pub score: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoadmapOverview {
    pub target_role: Option<String>,
    pub path_status: PathStatus,
    pub roadmap_status: RoadmapStatus,
    pub current_step: Option<u32>,
    pub current_step_title: Option<String>,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub progress_percentage: f64,
    pub active_stage: u32,
    pub actions: Vec<ActionSummary>,
    pub reroute_state: &'static str,
}

impl Orchestrator {
    /// Score the student's answers to the readiness diagnostics.
    pub async fn answer_diagnostics(&self, user_id: &str, answers: Vec<String>) -> Result<DiagnosticsReport> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        let result = self
            .runner
            .execute(&ReadinessAssessmentStage, &mut ctx, &answers)
            .await?;
        self.store.save(&mut ctx).await?;

        let readiness = &ctx.readiness;
        Ok(DiagnosticsReport {
            verdict: readiness.verdict,
            confidence_score: readiness.confidence_score,
            deviation_risk: readiness.deviation_risk,
            key_gaps: readiness.key_gaps.clone(),
            used_fallback: result.used_fallback,
            reroute_recommended: deviation_signal(&ctx, self.config.low_confidence),
        })
    }

    /// Mark an action done and generate its validation questions.
    pub async fn complete_action(&self, user_id: &str, action_id: &str, hours: f64) -> Result<ActionCompletion> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        mark_action_complete(&mut ctx, action_id, hours)?;
        let result = self
            .runner
            .execute(&self.validation_stage(), &mut ctx, &action_id.to_string())
            .await?;
        self.store.save(&mut ctx).await?;

        let (step_number, action) = ctx
            .roadmap
            .find_action(action_id)
            .ok_or_else(|| AgentError::ActionNotFound {
                action_id: action_id.to_string(),
            })?;
        info!(user_id, action_id, hours, "Action completed");
        Ok(ActionCompletion {
            action_id: action_id.to_string(),
            step_number,
            questions: action.questions.clone(),
            used_fallback: result.used_fallback,
            time_spent_hours: ctx.progress.time_spent_hours,
        })
    }

    /// Evaluate validation answers, then advance the roadmap or escalate.
    pub async fn submit_validation_answers(
        &self,
        user_id: &str,
        action_id: &str,
        answers: Vec<String>,
    ) -> Result<ValidationReport> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;
        let thresholds = self.config.thresholds;

        let params = EvaluationParams {
            action_id: action_id.to_string(),
            answers,
        };
        self.runner
            .execute(&self.evaluation_stage(), &mut ctx, &params)
            .await?;
        let outcome = record_evaluation(&mut ctx, action_id, thresholds)?;
        self.conclude_validation(user_id, ctx, action_id, outcome).await
    }

    /// Complete an action with a self-reported score instead of answering questions.
    pub async fn mark_action_completed(
        &self,
        user_id: &str,
        action_id: &str,
        score: u8,
        hours: f64,
    ) -> Result<ValidationReport> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        let outcome = record_manual_score(&mut ctx, action_id, score, hours, self.config.thresholds)?;
        info!(user_id, action_id, score, hours, "Action marked complete with a manual score");
        self.conclude_validation(user_id, ctx, action_id, outcome).await
    }

    /// Advance or escalate on a recorded outcome, then save. Caller holds the user lock.
    async fn conclude_validation(
        &self,
        user_id: &str,
        mut ctx: UserContext,
        action_id: &str,
        outcome: ValidationOutcome,
    ) -> Result<ValidationReport> {
        let thresholds = self.config.thresholds;
        let step = match outcome {
            ValidationOutcome::Passed { .. } => Some(evaluate_current_step(&mut ctx, thresholds)),
            _ => None,
        };

        // The advance and the next step's actions are committed together, so a
        // failed generation leaves the step and the answers as they were.
        let mut new_actions = 0;
        if let Some(StepTransition::Advanced { next, .. }) = &step {
            let params = ActionParams {
                step_number: Some(*next),
            };
            if let Err(e) = self.runner.execute(&self.action_stage(), &mut ctx, &params).await {
                warn!(user_id, step = *next, error = %e, "Action generation failed, step advance not saved");
                return Err(e.into());
            }
            new_actions = ctx.roadmap.step(*next).map_or(0, |s| s.actions.len());
        }
        self.store.save(&mut ctx).await?;

        let (score, feedback) = ctx
            .roadmap
            .find_action(action_id)
            .and_then(|(_, a)| a.evaluation.as_ref())
            .map(|e| (e.total_score, e.feedback.clone()))
            .unwrap_or_default();

        let mut reroute_offer = None;
        if let ValidationOutcome::Escalated { reason, .. } = &outcome {
            if ctx.reroute_state == RerouteState::Normal {
                detect(
                    &mut ctx,
                    reason,
                    DetectionTrigger::RepeatedFailure {
                        action_id: action_id.to_string(),
                    },
                )?;
                // Detecting is kept on failure; request_reroute retries the analysis.
                let analysis = self.runner.execute(&FailureAnalysisStage, &mut ctx, &()).await;
                self.store.save(&mut ctx).await?;
                analysis?;
                reroute_offer = ctx.reroute_state.offer().cloned();
            } else {
                warn!(user_id, state = ctx.reroute_state.name(), "Escalation ignored, reroute already in progress");
            }
        }

        Ok(ValidationReport {
            action_id: action_id.to_string(),
            score,
            feedback,
            outcome,
            step,
            new_actions,
            reroute_offer,
            completion_rate: ctx.progress.completion_rate,
        })
    }

    /// Generate a progress review and refresh readiness.
    pub async fn request_feedback(&self, user_id: &str) -> Result<FeedbackReport> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        let result = self.runner.execute(&FeedbackStage, &mut ctx, &()).await?;
        self.store.save(&mut ctx).await?;

        Ok(FeedbackReport {
            feedback: ctx.feedback.clone(),
            used_fallback: result.used_fallback,
            reroute_recommended: deviation_signal(&ctx, self.config.low_confidence),
        })
    }

    /// Append a blocker. Naming an action marks it as started.
    pub async fn record_blocker(
        &self,
        user_id: &str,
        description: &str,
        action_id: Option<&str>,
    ) -> Result<usize> {
        if description.trim().is_empty() {
            return Err(PipelineError::InvalidInput("blocker description must not be empty".into()).into());
        }
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        if let Some(id) = action_id {
            let (_, action) = ctx
                .roadmap
                .find_action_mut(id)
                .ok_or_else(|| AgentError::ActionNotFound {
                    action_id: id.to_string(),
                })?;
            if action.status == ActionStatus::Pending {
                action.status = ActionStatus::InProgress;
            }
        }
        ctx.progress.record_blocker(description.trim(), action_id);
        ctx.metadata.record_event("blocker", description.trim());
        ctx.touch();
        self.store.save(&mut ctx).await?;

        Ok(ctx.progress.blockers.len())
    }

    /// First action of the current step that has not passed validation.
    pub async fn next_action(&self, user_id: &str) -> Result<Option<NextAction>> {
        let ctx = self.load_existing(user_id).await?;
        let Some(step) = ctx.roadmap.current_step() else {
            return Ok(None);
        };
        let next = step
            .actions
            .iter()
            .find(|a| !a.agent_satisfied)
            .map(|a| NextAction {
                step_number: step.step_number,
                step_title: step.title.clone(),
                action: a.clone(),
            });
        Ok(next)
    }

    pub async fn roadmap_status(&self, user_id: &str) -> Result<RoadmapOverview> {
        let ctx = self.load_existing(user_id).await?;
        let current = ctx.roadmap.current_step();
        Ok(RoadmapOverview {
            target_role: ctx.active_path.target_role.clone(),
            path_status: ctx.active_path.status,
            roadmap_status: ctx.roadmap.status,
            current_step: current.map(|s| s.step_number),
            current_step_title: current.map(|s| s.title.clone()),
            completed_steps: ctx.roadmap.completed_steps.len(),
            total_steps: ctx.roadmap.steps.len(),
            progress_percentage: ctx.progress.completion_rate * 100.0,
            active_stage: ctx.progress.active_stage(),
            actions: current
                .map(|s| {
                    s.actions
                        .iter()
                        .map(|a| ActionSummary {
                            action_id: a.action_id.clone(),
                            title: a.title.clone(),
                            status: a.status,
                            agent_satisfied: a.agent_satisfied,
                            attempts: a.attempts,
                            score: a.evaluation.as_ref().map(|e| e.total_score),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            reroute_state: ctx.reroute_state.name(),
        })
    }
}
