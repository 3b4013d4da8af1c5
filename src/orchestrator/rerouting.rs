//! Reroute commands: request, select, abandon and revert.

use serde::Serialize;
use tracing::{info, warn};

use super::{Orchestrator, StageReport};
use crate::agents::market::{MarketParams, MarketStage};
use crate::agents::path::{PathParams, PathStage};
use crate::agents::rerouting::FailureAnalysisStage;
use crate::agents::Prerequisite;
use crate::agents::actions::ActionParams;
use crate::context::UserContext;
use crate::engine::consistency::{ConsistencyReport, reconcile};
use crate::engine::reroute::{
    self, ApplyOutcome, DetectionTrigger, RerouteChoice, RerouteOffer, RerouteState,
    ReroutedCompletion, RevertOutcome,
};
use crate::error::{AgentError, Result};

const DEFAULT_REASON: &str = "Student requested a reroute";

#[derive(Debug, Clone, Serialize)]
pub struct RerouteOfferReport {
    pub offer: Option<RerouteOffer>,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RerouteReport {
    /// `None` when an interrupted regeneration was resumed.
    pub outcome: Option<ApplyOutcome>,
    pub stages: Vec<StageReport>,
    pub consistency: ConsistencyReport,
    pub reroute_count: u32,
    pub target_role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevertReport {
    pub outcome: RevertOutcome,
    pub stages: Vec<StageReport>,
    pub consistency: Option<ConsistencyReport>,
}

impl Orchestrator {
    /// Open a reroute for the current path and generate options.
    pub async fn request_reroute(&self, user_id: &str, reason: &str) -> Result<RerouteOfferReport> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        if !ctx.active_path.is_planned() {
            return Err(AgentError::MissingPrerequisite(Prerequisite::PathPlanning).into());
        }
        let reason = match reason.trim() {
            "" => DEFAULT_REASON,
            r => r,
        };

        // A previous analysis that failed leaves the machine in Detecting.
        if !matches!(ctx.reroute_state, RerouteState::Detecting { .. }) {
            reroute::detect(&mut ctx, reason, DetectionTrigger::Manual)?;
        }
        let result = self.runner.execute(&FailureAnalysisStage, &mut ctx, &()).await;
        self.store.save(&mut ctx).await?;
        let result = result?;

        Ok(RerouteOfferReport {
            offer: ctx.reroute_state.offer().cloned(),
            used_fallback: result.used_fallback,
        })
    }

    /// Apply an offered option, then rebuild what it invalidated.
    pub async fn select_reroute_option(&self, user_id: &str, option: &str) -> Result<RerouteReport> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        let (outcome, regenerate) = if matches!(ctx.reroute_state, RerouteState::Applied { .. }) {
            info!(user_id, "Resuming interrupted reroute");
            (None, !ctx.roadmap.is_generated())
        } else {
            let choice: RerouteChoice = option.parse()?;
            let outcome = reroute::apply_selection(&mut ctx, choice)?;
            self.store.save(&mut ctx).await?;
            let regenerate = outcome.needs_regeneration;
            (Some(outcome), regenerate)
        };

        let mut stages = Vec::new();
        if regenerate {
            let role = ctx.active_path.target_role.clone();
            self.rebuild_path(&mut ctx, role, &mut stages).await?;
        }
        let consistency = self.settle(&mut ctx, &mut stages).await?;
        reroute::finish(&mut ctx)?;
        self.store.save(&mut ctx).await?;

        Ok(RerouteReport {
            outcome,
            stages,
            consistency,
            reroute_count: ctx.reroute_history.reroute_count(),
            target_role: ctx.active_path.target_role.clone(),
        })
    }

    /// Drop an open reroute and keep the current path.
    pub async fn abandon_reroute(&self, user_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;
        reroute::abandon(&mut ctx)?;
        self.store.save(&mut ctx).await?;
        Ok(())
    }

    /// Go back to the originally pinned role if enough of the alternative is done.
    pub async fn revert_to_original(&self, user_id: &str) -> Result<RevertReport> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        let outcome = reroute::revert_to_original(&mut ctx, self.config.revert_threshold)?;
        let RevertOutcome::Reverted { to_role, .. } = outcome.clone() else {
            return Ok(RevertReport {
                outcome,
                stages: Vec::new(),
                consistency: None,
            });
        };
        self.store.save(&mut ctx).await?;

        let mut stages = Vec::new();
        self.rebuild_path(&mut ctx, Some(to_role), &mut stages).await?;
        let consistency = self.settle(&mut ctx, &mut stages).await?;
        self.store.save(&mut ctx).await?;

        Ok(RevertReport {
            outcome,
            stages,
            consistency: Some(consistency),
        })
    }

    /// Close out a finished alternative roadmap so the student can revert.
    pub async fn complete_rerouted_roadmap(&self, user_id: &str) -> Result<ReroutedCompletion> {
        let _guard = self.locks.acquire(user_id).await;
        let mut ctx = self.load_existing(user_id).await?;

        let completion = reroute::complete_rerouted_roadmap(&mut ctx)?;
        if completion.redirect_available {
            self.store.save(&mut ctx).await?;
        }
        Ok(completion)
    }

    /// Market → path → roadmap → actions for `role`.
    async fn rebuild_path(
        &self,
        ctx: &mut UserContext,
        role: Option<String>,
        stages: &mut Vec<StageReport>,
    ) -> std::result::Result<(), AgentError> {
        info!(user_id = %ctx.user_id, role = ?role, "Regenerating path");
        let market = MarketParams { role: role.clone() };
        let path = PathParams { target_role: role };

        self.sequence_stage(&MarketStage, ctx, &market, stages).await?;
        self.sequence_stage(&PathStage, ctx, &path, stages).await?;
        self.sequence_stage(&self.roadmap_stage(), ctx, &(), stages).await?;
        self.sequence_stage(&self.action_stage(), ctx, &ActionParams::default(), stages).await
    }

    /// Reconcile and top up actions if the current step has none open.
    async fn settle(
        &self,
        ctx: &mut UserContext,
        stages: &mut Vec<StageReport>,
    ) -> std::result::Result<ConsistencyReport, AgentError> {
        let report = reconcile(ctx);
        if !report.is_clean() {
            warn!(user_id = %ctx.user_id, issues = report.issues.len(), "Consistency issues corrected");
        }
        if report.needs_actions {
            self.sequence_stage(&self.action_stage(), ctx, &ActionParams::default(), stages)
                .await?;
        }
        Ok(report)
    }
}
