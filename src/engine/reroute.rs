//! Rerouting state machine: detect a failing path, offer options, apply one.
//!
//! Normal → Detecting → Offering → Applied → Normal. `Abandon` returns to
//! Normal from Detecting or Offering without changing the path.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::UserContext;
use crate::context::model::{
    DeviationRisk, FailedPath, PathChangeKind, PathStatus, PathType, Roadmap, RoadmapStatus,
    contains_ignore_case,
};
use crate::error::RerouteError;

/// What started a reroute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionTrigger {
    Manual,
    RepeatedFailure { action_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub reason: String,
    pub trigger: DetectionTrigger,
    pub role: Option<String>,
    pub completion_rate: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeOption {
    /// `alt-1`, `alt-2`, ...
    pub option_id: String,
    pub target_role: String,
    pub rationale: String,
    pub transferable_skills: Vec<String>,
    pub additional_skills: Vec<String>,
    pub success_probability: Option<f64>,
    pub estimated_duration_months: Option<f64>,
}

/// Keep the original role on a longer timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedOriginal {
    pub target_role: String,
    pub extended_timeline_months: Option<f64>,
    pub modifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerouteOffer {
    pub failure_type: String,
    pub failure_reasons: Vec<String>,
    pub salvageable_skills: Vec<String>,
    pub alternatives: Vec<AlternativeOption>,
    pub adjusted_original: AdjustedOriginal,
    pub next_steps: Vec<String>,
    pub offered_at: DateTime<Utc>,
}

impl RerouteOffer {
    /// Alternatives plus the adjusted original, when it names a role.
    pub fn option_count(&self) -> usize {
        let adjusted = usize::from(!self.adjusted_original.target_role.trim().is_empty());
        self.alternatives.len() + adjusted
    }

    fn contains(&self, choice: &RerouteChoice) -> bool {
        match choice {
            RerouteChoice::Alternative { index } => *index < self.alternatives.len(),
            RerouteChoice::AdjustedOriginal => !self.adjusted_original.target_role.trim().is_empty(),
        }
    }
}

/// The student's pick from an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RerouteChoice {
    /// Zero-based index into the offered alternatives.
    Alternative { index: usize },
    AdjustedOriginal,
}

impl FromStr for RerouteChoice {
    type Err = RerouteError;

    /// Accepts `adjusted`, `adjusted_original`, `alt-N` or `N` (1-based).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        if matches!(raw.as_str(), "adjusted" | "adjusted_original" | "adjusted-original" | "original") {
            return Ok(Self::AdjustedOriginal);
        }
        let number = raw.strip_prefix("alt-").unwrap_or(&raw);
        match number.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Self::Alternative { index: n - 1 }),
            _ => Err(RerouteError::UnknownOption(s.trim().to_string())),
        }
    }
}

impl std::fmt::Display for RerouteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alternative { index } => write!(f, "alt-{}", index + 1),
            Self::AdjustedOriginal => write!(f, "adjusted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedReroute {
    pub choice: RerouteChoice,
    pub from_role: Option<String>,
    pub to_role: String,
    pub applied_at: DateTime<Utc>,
}

/// Where the rerouting machine is for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RerouteState {
    #[default]
    Normal,
    Detecting {
        detection: Detection,
    },
    Offering {
        detection: Detection,
        offer: RerouteOffer,
    },
    Applied {
        detection: Detection,
        applied: AppliedReroute,
    },
}

#[derive(Debug, Clone)]
pub enum RerouteEvent {
    Detect(Detection),
    Propose(RerouteOffer),
    Select(AppliedReroute),
    Complete,
    Abandon,
}

impl RerouteEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Detect(_) => "detect",
            Self::Propose(_) => "propose",
            Self::Select(_) => "select",
            Self::Complete => "complete",
            Self::Abandon => "abandon",
        }
    }
}

impl RerouteState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Detecting { .. } => "detecting",
            Self::Offering { .. } => "offering",
            Self::Applied { .. } => "applied",
        }
    }

    pub fn is_rerouting(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    pub fn offer(&self) -> Option<&RerouteOffer> {
        match self {
            Self::Offering { offer, .. } => Some(offer),
            _ => None,
        }
    }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::Normal => None,
            Self::Detecting { detection }
            | Self::Offering { detection, .. }
            | Self::Applied { detection, .. } => Some(detection),
        }
    }

    /// Check if `event` is valid in the current state.
    pub fn can_accept(&self, event: &RerouteEvent) -> bool {
        use RerouteEvent as E;
        matches!(
            (self, event),
            (Self::Normal, E::Detect(_))
                | (Self::Detecting { .. }, E::Propose(_))
                | (Self::Offering { .. }, E::Select(_))
                | (Self::Applied { .. }, E::Complete)
                | (Self::Detecting { .. } | Self::Offering { .. }, E::Abandon)
        )
    }

    /// The single entry point for state changes. On `Err` the state is unchanged.
    pub fn transition(&mut self, event: RerouteEvent) -> Result<(), RerouteError> {
        if !self.can_accept(&event) {
            return Err(RerouteError::InvalidTransition {
                state: self.name().to_string(),
                event: event.name().to_string(),
            });
        }
        match (&*self, &event) {
            (_, RerouteEvent::Propose(offer)) if offer.option_count() == 0 => {
                return Err(RerouteError::NoOptions);
            }
            (Self::Offering { offer, .. }, RerouteEvent::Select(applied))
                if !offer.contains(&applied.choice) =>
            {
                return Err(RerouteError::UnknownOption(applied.choice.to_string()));
            }
            _ => {}
        }

        *self = match (std::mem::take(self), event) {
            (Self::Normal, RerouteEvent::Detect(detection)) => Self::Detecting { detection },
            (Self::Detecting { detection }, RerouteEvent::Propose(offer)) => {
                Self::Offering { detection, offer }
            }
            (Self::Offering { detection, .. }, RerouteEvent::Select(applied)) => {
                Self::Applied { detection, applied }
            }
            // Complete and Abandon both land in Normal.
            _ => Self::Normal,
        };
        Ok(())
    }
}

/// Enter Detecting for the user's current path.
pub fn detect(
    ctx: &mut UserContext,
    reason: &str,
    trigger: DetectionTrigger,
) -> Result<(), RerouteError> {
    let detection = Detection {
        reason: reason.to_string(),
        trigger,
        role: ctx.active_path.target_role.clone(),
        completion_rate: ctx.progress.completion_rate,
        detected_at: Utc::now(),
    };
    ctx.reroute_state.transition(RerouteEvent::Detect(detection))?;
    ctx.reroute_history.reasons.push(reason.to_string());
    ctx.metadata.record_event("reroute_detected", reason);
    info!(user_id = %ctx.user_id, reason, "Reroute detected");
    Ok(())
}

/// Leave Detecting/Offering without touching the path.
pub fn abandon(ctx: &mut UserContext) -> Result<(), RerouteError> {
    ctx.reroute_state.transition(RerouteEvent::Abandon)?;
    ctx.metadata.record_event("reroute_abandoned", "Reroute abandoned, keeping current path");
    info!(user_id = %ctx.user_id, "Reroute abandoned");
    Ok(())
}

/// Result of applying an offered option.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub choice: RerouteChoice,
    pub from_role: Option<String>,
    pub to_role: String,
    pub reroute_count: u32,
    pub archived_actions: usize,
    /// Path, roadmap and actions must be generated again.
    pub needs_regeneration: bool,
}

fn replace_roadmap(ctx: &mut UserContext) -> usize {
    let archived = ctx.reroute_history.archive_completed(&ctx.roadmap);
    ctx.roadmap = Roadmap::default();
    ctx.feedback = None;
    ctx.progress.reset_for_new_path();
    ctx.active_path.steps.clear();
    archived
}

/// Apply the chosen option and move to Applied.
pub fn apply_selection(
    ctx: &mut UserContext,
    choice: RerouteChoice,
) -> Result<ApplyOutcome, RerouteError> {
    let RerouteState::Offering { detection, offer } = &ctx.reroute_state else {
        return Err(RerouteError::InvalidTransition {
            state: ctx.reroute_state.name().to_string(),
            event: "select".to_string(),
        });
    };
    if !offer.contains(&choice) {
        return Err(RerouteError::UnknownOption(choice.to_string()));
    }
    let reason = detection.reason.clone();
    let offer = offer.clone();
    let from_role = ctx.active_path.target_role.clone();

    let (to_role, archived, needs_regeneration, count) = match choice {
        RerouteChoice::Alternative { index } => {
            let option = &offer.alternatives[index];
            ctx.reroute_history.failed_paths.push(FailedPath {
                role: from_role.clone().unwrap_or_default(),
                reason: reason.clone(),
                completion_rate: ctx.progress.completion_rate,
                failed_at: Utc::now(),
            });

            if ctx.reroute_history.original_goal.is_none() {
                ctx.reroute_history.original_goal = ctx.goal.interpreted.clone();
            }
            let path = &mut ctx.active_path;
            path.switch_role(PathChangeKind::Alternative, &option.target_role, &reason);
            path.path_type = PathType::Alternative;
            path.status = PathStatus::InProgress;
            path.fallback_paths.clear();
            path.modification_notes = vec![option.rationale.clone()];
            path.estimated_duration_months = option.estimated_duration_months;
            if let Some(p) = option.success_probability {
                path.success_probability = p;
            }

            if let Some(goal) = ctx.goal.interpreted.as_mut() {
                goal.role_title = option.target_role.clone();
                let mut skills: Vec<String> = Vec::new();
                for skill in option.transferable_skills.iter().chain(&option.additional_skills) {
                    if !contains_ignore_case(&skills, skill) {
                        skills.push(skill.clone());
                    }
                }
                goal.required_skills = skills;
            }

            let archived = replace_roadmap(ctx);
            let count = ctx.reroute_history.record_applied(
                PathChangeKind::Alternative,
                &format!(
                    "Switched from {} to {}",
                    from_role.as_deref().unwrap_or("no role"),
                    option.target_role
                ),
            );
            (option.target_role.clone(), archived, true, count)
        }
        RerouteChoice::AdjustedOriginal => {
            let adjusted = &offer.adjusted_original;
            let role = from_role
                .clone()
                .unwrap_or_else(|| adjusted.target_role.clone());
            let path = &mut ctx.active_path;
            path.switch_role(PathChangeKind::AdjustedOriginal, &role, &reason);
            path.path_type = PathType::AdjustedOriginal;
            path.status = PathStatus::Resumed;
            if let Some(months) = adjusted.extended_timeline_months {
                path.estimated_duration_months = Some(months);
            }
            path.modification_notes.extend(adjusted.modifications.iter().cloned());

            let count = ctx.reroute_history.record_applied(
                PathChangeKind::AdjustedOriginal,
                &format!(
                    "Kept {role} with timeline {}",
                    adjusted
                        .extended_timeline_months
                        .map(|m| format!("{m:.1} months"))
                        .unwrap_or_else(|| "unchanged".to_string())
                ),
            );
            (role, 0, false, count)
        }
    };

    ctx.reroute_state.transition(RerouteEvent::Select(AppliedReroute {
        choice,
        from_role: from_role.clone(),
        to_role: to_role.clone(),
        applied_at: Utc::now(),
    }))?;
    ctx.metadata
        .record_event("reroute_applied", format!("Applied {choice}: now targeting {to_role}"));
    info!(user_id = %ctx.user_id, %choice, to_role = %to_role, reroute_count = count, "Reroute applied");

    Ok(ApplyOutcome {
        choice,
        from_role,
        to_role,
        reroute_count: count,
        archived_actions: archived,
        needs_regeneration,
    })
}

/// Applied → Normal once the new path is in place.
pub fn finish(ctx: &mut UserContext) -> Result<(), RerouteError> {
    ctx.reroute_state.transition(RerouteEvent::Complete)?;
    ctx.metadata.record_event("reroute_completed", "Reroute finished");
    Ok(())
}

/// Result of asking to go back to the original role.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RevertOutcome {
    Reverted {
        from_role: String,
        to_role: String,
        reroute_count: u32,
    },
    Warning {
        completion_rate: f64,
        required: f64,
        message: String,
    },
    NotApplicable {
        message: String,
    },
}

/// Restore the original role once enough of the alternative is done.
pub fn revert_to_original(
    ctx: &mut UserContext,
    threshold: f64,
) -> Result<RevertOutcome, RerouteError> {
    if ctx.reroute_state.is_rerouting() {
        return Err(RerouteError::InvalidTransition {
            state: ctx.reroute_state.name().to_string(),
            event: "revert".to_string(),
        });
    }

    let path = &ctx.active_path;
    let (Some(original), Some(current)) = (path.original_target_role(), path.target_role.as_deref())
    else {
        return Ok(RevertOutcome::NotApplicable {
            message: "No original target role to revert to".to_string(),
        });
    };
    if path.path_type != PathType::Alternative || original.eq_ignore_ascii_case(current) {
        return Ok(RevertOutcome::NotApplicable {
            message: format!("Already on the original path to {original}"),
        });
    }

    let completion = ctx.progress.completion_rate;
    if completion < threshold {
        return Ok(RevertOutcome::Warning {
            completion_rate: completion,
            required: threshold,
            message: format!(
                "Complete at least {:.0}% of the current path before reverting ({:.0}% done)",
                threshold * 100.0,
                completion * 100.0
            ),
        });
    }

    let original = original.to_string();
    let from_role = current.to_string();
    let path = &mut ctx.active_path;
    path.switch_role(
        PathChangeKind::Reversion,
        &original,
        &format!("Reverted after completing {:.0}% of {from_role}", completion * 100.0),
    );
    path.path_type = PathType::Original;
    path.status = PathStatus::Resumed;
    path.fallback_paths.clear();
    path.modification_notes = vec![format!("Resumed after {from_role}")];
    match ctx.reroute_history.original_goal.clone() {
        Some(goal) => ctx.goal.interpreted = Some(goal),
        None => {
            if let Some(goal) = ctx.goal.interpreted.as_mut() {
                goal.role_title = original.clone();
            }
        }
    }

    replace_roadmap(ctx);
    let count = ctx.reroute_history.record_applied(
        PathChangeKind::Reversion,
        &format!("Reverted from {from_role} to {original}"),
    );
    ctx.metadata
        .record_event("path_reverted", format!("Reverted from {from_role} to {original}"));
    info!(user_id = %ctx.user_id, from_role = %from_role, to_role = %original, "Reverted to original path");

    Ok(RevertOutcome::Reverted {
        from_role,
        to_role: original,
        reroute_count: count,
    })
}

/// Result of finishing the roadmap of an alternative role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReroutedCompletion {
    pub completed_role: Option<String>,
    pub original_role: Option<String>,
    /// The student may now revert to the original role.
    pub redirect_available: bool,
    pub message: String,
}

/// Close out a finished alternative roadmap and open the way back to the original role.
pub fn complete_rerouted_roadmap(ctx: &mut UserContext) -> Result<ReroutedCompletion, RerouteError> {
    if ctx.reroute_state.is_rerouting() {
        return Err(RerouteError::InvalidTransition {
            state: ctx.reroute_state.name().to_string(),
            event: "complete_rerouted_roadmap".to_string(),
        });
    }

    let completed_role = ctx.active_path.target_role.clone();
    let original_role = ctx.active_path.original_target_role().map(str::to_string);
    if ctx.active_path.path_type != PathType::Alternative {
        return Ok(ReroutedCompletion {
            completed_role,
            original_role: None,
            redirect_available: false,
            message: "No original roadmap to return to".to_string(),
        });
    }
    if ctx.roadmap.status != RoadmapStatus::Completed {
        return Err(RerouteError::RoadmapUnfinished {
            completed: ctx.roadmap.completed_steps.len(),
            total: ctx.roadmap.steps.len(),
        });
    }

    ctx.active_path.status = PathStatus::Completed;
    ctx.progress.completion_rate = 1.0;
    let role = completed_role.as_deref().unwrap_or("alternative role");
    ctx.metadata
        .record_event("rerouted_roadmap_completed", format!("Completed rerouted roadmap for {role}"));
    info!(user_id = %ctx.user_id, role, "Rerouted roadmap completed");

    let message = match original_role.as_deref() {
        Some(original) => format!("Rerouted roadmap completed. You can now return to {original}"),
        None => "Rerouted roadmap completed".to_string(),
    };
    Ok(ReroutedCompletion {
        redirect_available: original_role.is_some(),
        completed_role,
        original_role,
        message,
    })
}

/// A reroute recommendation when readiness has dropped. Never changes state.
pub fn deviation_signal(ctx: &UserContext, low_confidence: f64) -> Option<String> {
    if !ctx.active_path.is_planned() || ctx.reroute_state.is_rerouting() {
        return None;
    }
    if let Some(confidence) = ctx.readiness.confidence_score {
        if confidence < low_confidence {
            return Some(format!(
                "Confidence {confidence:.2} is below {low_confidence:.2}; consider requesting a reroute"
            ));
        }
    }
    if ctx.readiness.deviation_risk == Some(DeviationRisk::High) {
        return Some("Deviation risk is high; consider requesting a reroute".to_string());
    }
    None
}
