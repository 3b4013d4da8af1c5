//! Market analysis agent.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::prompts::stage_prompt;
use super::{AgentKind, Prerequisite, Stage, StagePrompt, require};
use crate::context::UserContext;
use crate::context::model::{AdjacentRole, MarketSnapshot, MarketTrend, TrendPoint};
use crate::error::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedAdjacentRole {
    pub role: String,
    pub reason: String,
    pub demand_score: Option<f64>,
}

/// Generated market snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketAnalysis {
    pub role_title: String,
    /// 0–100.
    pub demand_score: f64,
    pub competition_level: String,
    pub entry_barrier: String,
    pub market_trend: String,
    pub in_demand_skills: Vec<String>,
    pub adjacent_safer_roles: Vec<GeneratedAdjacentRole>,
    pub market_notes: String,
}

const SCHEMA: &str = r#"{
  "role_title": "Data Analyst",
  "demand_score": 72,
  "competition_level": "low|medium|high",
  "entry_barrier": "low|medium|high",
  "market_trend": "growing|stable|declining",
  "in_demand_skills": ["SQL", "Power BI"],
  "adjacent_safer_roles": [{"role": "...", "reason": "...", "demand_score": 65}],
  "market_notes": "..."
}"#;

/// Which role to analyse; defaults to the interpreted goal, then the active path.
#[derive(Debug, Clone, Default)]
pub struct MarketParams {
    pub role: Option<String>,
}

pub struct MarketStage;

fn demand(score: f64) -> u8 {
    if score.is_finite() {
        score.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn role_for(ctx: &UserContext, params: &MarketParams) -> Option<String> {
    params
        .role
        .clone()
        .or_else(|| ctx.goal.interpreted.as_ref().map(|g| g.role_title.clone()))
        .or_else(|| ctx.active_path.target_role.clone())
}

impl Stage for MarketStage {
    type Params = MarketParams;
    type Output = MarketAnalysis;

    const AGENT: AgentKind = AgentKind::MarketAnalysis;
    const NAME: &'static str = "market_analysis";

    fn check(&self, ctx: &UserContext, params: &MarketParams) -> Result<(), AgentError> {
        if params.role.is_some() {
            return Ok(());
        }
        require(ctx.goal.interpreted.is_some(), Prerequisite::GoalInterpretation)
    }

    fn prompt(&self, ctx: &UserContext, params: &MarketParams) -> StagePrompt {
        stage_prompt(
            "labour market analyst",
            "Assess current hiring demand (0-100), competition and entry barrier for the \
             role, the skills employers ask for most, and up to three adjacent roles that \
             are easier to enter.",
            &json!({
                "role": role_for(ctx, params),
                "region": "global",
                "candidate_skills": ctx.profile.all_skills(),
            }),
            SCHEMA,
            0.4,
            1200,
        )
    }

    fn accept(&self, output: &MarketAnalysis) -> bool {
        !output.role_title.trim().is_empty() || output.demand_score > 0.0
    }

    fn fallback(&self, ctx: &UserContext, params: &MarketParams) -> MarketAnalysis {
        MarketAnalysis {
            role_title: role_for(ctx, params).unwrap_or_default(),
            demand_score: 50.0,
            competition_level: "medium".to_string(),
            entry_barrier: "medium".to_string(),
            market_trend: "stable".to_string(),
            in_demand_skills: Vec::new(),
            adjacent_safer_roles: Vec::new(),
            market_notes: "Market data unavailable; neutral estimate used".to_string(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &MarketAnalysis, params: &MarketParams) {
        let now = Utc::now();
        let role = if output.role_title.trim().is_empty() {
            role_for(ctx, params).unwrap_or_default()
        } else {
            output.role_title.trim().to_string()
        };
        let trend = MarketTrend::parse_lenient(&output.market_trend);
        let demand_score = demand(output.demand_score);

        ctx.market.snapshot = Some(MarketSnapshot {
            role_title: role.clone(),
            demand_score,
            competition_level: output.competition_level.clone(),
            entry_barrier: output.entry_barrier.clone(),
            trend,
            in_demand_skills: output.in_demand_skills.clone(),
            adjacent_roles: output
                .adjacent_safer_roles
                .iter()
                .filter(|r| !r.role.trim().is_empty())
                .map(|r| AdjacentRole {
                    role: r.role.trim().to_string(),
                    reason: r.reason.clone(),
                    demand_score: r.demand_score.map(demand),
                })
                .collect(),
            notes: (!output.market_notes.is_empty()).then(|| output.market_notes.clone()),
            analyzed_at: now,
        });
        ctx.market.trend_history.push(TrendPoint {
            role,
            demand_score,
            trend,
            recorded_at: now,
        });
    }
}
