//! Rerouting agent: analyses why a path is failing and proposes options.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::prompts::stage_prompt;
use super::{AgentKind, Prerequisite, Stage, StagePrompt, require, unit_interval};
use crate::context::UserContext;
use crate::context::model::contains_ignore_case;
use crate::engine::reroute::{
    AdjustedOriginal, AlternativeOption, RerouteEvent, RerouteOffer, RerouteState,
};
use crate::error::{AgentError, RerouteError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedAlternative {
    pub new_target_role: String,
    pub why_better_fit: String,
    pub existing_skills_applicable: Vec<String>,
    pub additional_skills_needed: Vec<String>,
    pub success_probability: Option<f64>,
    pub estimated_duration_months: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedAdjustment {
    pub modifications: Vec<String>,
    pub extended_timeline_months: Option<f64>,
}

/// Generated failure analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureAnalysis {
    pub failure_type: String,
    pub failure_reasons: Vec<String>,
    pub salvageable_skills: Vec<String>,
    pub alternative_paths: Vec<GeneratedAlternative>,
    pub adjusted_original_path: GeneratedAdjustment,
    pub next_steps: Vec<String>,
}

const SCHEMA: &str = r#"{
  "failure_type": "skill_gap|motivation|time|market|other",
  "failure_reasons": ["..."],
  "salvageable_skills": ["..."],
  "alternative_paths": [
    {"new_target_role": "...", "why_better_fit": "...", "existing_skills_applicable": ["..."],
     "additional_skills_needed": ["..."], "success_probability": 0.75, "estimated_duration_months": 6}
  ],
  "adjusted_original_path": {"modifications": ["..."], "extended_timeline_months": 14},
  "next_steps": ["..."]
}"#;

/// Runs while the reroute machine is Detecting and moves it to Offering.
pub struct FailureAnalysisStage;

impl Stage for FailureAnalysisStage {
    type Params = ();
    type Output = FailureAnalysis;

    const AGENT: AgentKind = AgentKind::Rerouting;
    const NAME: &'static str = "failure_analysis";

    fn check(&self, ctx: &UserContext, _params: &()) -> Result<(), AgentError> {
        require(ctx.active_path.is_planned(), Prerequisite::PathPlanning)?;
        if !matches!(ctx.reroute_state, RerouteState::Detecting { .. }) {
            return Err(RerouteError::InvalidTransition {
                state: ctx.reroute_state.name().to_string(),
                event: "propose".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn prompt(&self, ctx: &UserContext, _params: &()) -> StagePrompt {
        let struggling: Vec<_> = ctx
            .roadmap
            .actions()
            .filter(|a| a.attempts > 0)
            .map(|a| json!({"title": a.title, "attempts": a.attempts}))
            .collect();
        stage_prompt(
            "career rerouting advisor",
            "The student is struggling on their current path. Work out why, which skills \
             carry over, and propose alternative roles that fit them better. Also propose \
             how the original path could be adjusted to be achievable.",
            &json!({
                "target_role": ctx.active_path.target_role,
                "reason": ctx.reroute_state.detection().map(|d| d.reason.as_str()),
                "completion_rate": ctx.progress.completion_rate,
                "hours_spent": ctx.progress.time_spent_hours,
                "struggling_actions": struggling,
                "blockers": ctx.progress.blockers.iter().rev().take(5).map(|b| b.description.as_str()).collect::<Vec<_>>(),
                "skills": ctx.profile.all_skills(),
                "strengths": ctx.profile.strength_areas,
                "adjacent_roles": ctx.market.snapshot.as_ref().map(|m| m.adjacent_roles.clone()),
                "previously_failed_roles": ctx.reroute_history.failed_paths.iter().map(|f| f.role.as_str()).collect::<Vec<_>>(),
                "timeline_months": ctx.active_path.estimated_duration_months,
            }),
            SCHEMA,
            0.6,
            2000,
        )
    }

    fn accept(&self, output: &FailureAnalysis) -> bool {
        !output.failure_type.trim().is_empty() || !output.alternative_paths.is_empty()
    }

    fn fallback(&self, ctx: &UserContext, _params: &()) -> FailureAnalysis {
        let current = ctx.active_path.target_role.clone().unwrap_or_default();
        let skills = ctx.profile.all_skills();
        let mut seen: Vec<String> = vec![current.clone()];
        let mut alternatives = Vec::new();

        for fallback in &ctx.active_path.fallback_paths {
            if contains_ignore_case(&seen, &fallback.role) {
                continue;
            }
            seen.push(fallback.role.clone());
            alternatives.push(GeneratedAlternative {
                new_target_role: fallback.role.clone(),
                why_better_fit: fallback.reason.clone(),
                existing_skills_applicable: skills.clone(),
                additional_skills_needed: Vec::new(),
                success_probability: fallback.success_probability,
                estimated_duration_months: None,
            });
        }
        if let Some(market) = ctx.market.snapshot.as_ref() {
            for adjacent in &market.adjacent_roles {
                if contains_ignore_case(&seen, &adjacent.role) {
                    continue;
                }
                seen.push(adjacent.role.clone());
                alternatives.push(GeneratedAlternative {
                    new_target_role: adjacent.role.clone(),
                    why_better_fit: adjacent.reason.clone(),
                    existing_skills_applicable: skills.clone(),
                    additional_skills_needed: Vec::new(),
                    success_probability: None,
                    estimated_duration_months: None,
                });
            }
        }

        let timeline = ctx.active_path.estimated_duration_months.unwrap_or(6.0) * 1.5;
        FailureAnalysis {
            failure_type: "other".to_string(),
            failure_reasons: ctx
                .reroute_state
                .detection()
                .map(|d| vec![d.reason.clone()])
                .unwrap_or_default(),
            salvageable_skills: skills,
            alternative_paths: alternatives,
            adjusted_original_path: GeneratedAdjustment {
                modifications: vec![
                    format!("Extend the timeline to {timeline:.1} months"),
                    "Revisit the fundamentals of the current step before moving on".to_string(),
                ],
                extended_timeline_months: Some(timeline),
            },
            next_steps: vec!["Choose one of the options to continue".to_string()],
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &FailureAnalysis, _params: &()) {
        let current = ctx.active_path.target_role.clone().unwrap_or_default();
        let mut seen = vec![current.clone()];
        let alternatives: Vec<AlternativeOption> = output
            .alternative_paths
            .iter()
            .filter(|a| !a.new_target_role.trim().is_empty())
            .filter(|a| {
                let keep = !contains_ignore_case(&seen, &a.new_target_role);
                if keep {
                    seen.push(a.new_target_role.clone());
                }
                keep
            })
            .enumerate()
            .map(|(i, a)| AlternativeOption {
                option_id: format!("alt-{}", i + 1),
                target_role: a.new_target_role.trim().to_string(),
                rationale: a.why_better_fit.clone(),
                transferable_skills: a.existing_skills_applicable.clone(),
                additional_skills: a.additional_skills_needed.clone(),
                success_probability: a.success_probability.map(unit_interval),
                estimated_duration_months: a
                    .estimated_duration_months
                    .filter(|m| m.is_finite() && *m > 0.0),
            })
            .collect();

        let extended = output
            .adjusted_original_path
            .extended_timeline_months
            .filter(|m| m.is_finite() && *m > 0.0)
            .or_else(|| ctx.active_path.estimated_duration_months.map(|m| m * 1.5));

        let offer = RerouteOffer {
            failure_type: output.failure_type.clone(),
            failure_reasons: output.failure_reasons.clone(),
            salvageable_skills: output.salvageable_skills.clone(),
            alternatives,
            adjusted_original: AdjustedOriginal {
                target_role: current,
                extended_timeline_months: extended,
                modifications: output.adjusted_original_path.modifications.clone(),
            },
            next_steps: output.next_steps.clone(),
            offered_at: Utc::now(),
        };
        let options = offer.option_count();
        if let Err(e) = ctx.reroute_state.transition(RerouteEvent::Propose(offer)) {
            warn!(user_id = %ctx.user_id, error = %e, "Could not offer reroute options");
            return;
        }
        ctx.metadata
            .record_event("reroute_offered", format!("{options} options offered"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::model::{AdjacentRole, FallbackPath, MarketSnapshot, MarketTrend};
    use crate::engine::reroute::{DetectionTrigger, detect};

    fn detecting_ctx() -> UserContext {
        let mut ctx = UserContext::new("x");
        ctx.active_path.target_role = Some("Data Scientist".into());
        ctx.active_path.estimated_duration_months = Some(10.0);
        ctx.active_path.fallback_paths = vec![FallbackPath {
            role: "Data Analyst".into(),
            reason: "less maths".into(),
            success_probability: Some(0.8),
        }];
        ctx.market.snapshot = Some(MarketSnapshot {
            role_title: "Data Scientist".into(),
            demand_score: 60,
            competition_level: "high".into(),
            entry_barrier: "high".into(),
            trend: MarketTrend::Stable,
            in_demand_skills: vec![],
            adjacent_roles: vec![
                AdjacentRole { role: "data analyst".into(), reason: "dup".into(), demand_score: None },
                AdjacentRole { role: "BI Developer".into(), reason: "dashboards".into(), demand_score: Some(70) },
            ],
            notes: None,
            analyzed_at: Utc::now(),
        });
        detect(&mut ctx, "stuck", DetectionTrigger::Manual).unwrap();
        ctx
    }

    #[test]
    fn needs_detecting_state() {
        let mut ctx = UserContext::new("x");
        ctx.active_path.target_role = Some("Data Scientist".into());
        assert!(matches!(
            FailureAnalysisStage.check(&ctx, &()),
            Err(AgentError::Reroute(RerouteError::InvalidTransition { .. }))
        ));
        assert!(FailureAnalysisStage.check(&detecting_ctx(), &()).is_ok());
    }

    #[test]
    fn fallback_offers_fallbacks_adjacent_roles_and_longer_timeline() {
        let mut ctx = detecting_ctx();
        let out = FailureAnalysisStage.fallback(&ctx, &());
        FailureAnalysisStage.apply(&mut ctx, &out, &());

        let offer = ctx.reroute_state.offer().unwrap();
        let roles: Vec<_> = offer.alternatives.iter().map(|a| a.target_role.as_str()).collect();
        assert_eq!(roles, vec!["Data Analyst", "BI Developer"]);
        assert_eq!(offer.alternatives[1].option_id, "alt-2");
        assert_eq!(offer.adjusted_original.target_role, "Data Scientist");
        assert_eq!(offer.adjusted_original.extended_timeline_months, Some(15.0));
    }

    #[test]
    fn current_role_is_never_offered_as_alternative() {
        let mut ctx = detecting_ctx();
        let out = FailureAnalysis {
            failure_type: "skill_gap".into(),
            alternative_paths: vec![
                GeneratedAlternative { new_target_role: "Data Scientist".into(), ..Default::default() },
                GeneratedAlternative { new_target_role: "ML Ops".into(), success_probability: Some(65.0), ..Default::default() },
            ],
            ..Default::default()
        };
        FailureAnalysisStage.apply(&mut ctx, &out, &());
        let offer = ctx.reroute_state.offer().unwrap();
        assert_eq!(offer.alternatives.len(), 1);
        assert_eq!(offer.alternatives[0].option_id, "alt-1");
        assert_eq!(offer.alternatives[0].success_probability, Some(0.65));
    }
}
