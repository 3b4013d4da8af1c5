//! Path planning agent: the career path, and the roadmap materialised from it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::prompts::stage_prompt;
use super::{AgentKind, Prerequisite, Stage, StagePrompt, require, unit_interval};
use crate::context::UserContext;
use crate::context::model::{
    FallbackPath, PathChangeKind, PathStep, Roadmap, RoadmapStatus, Step, StepStatus,
};
use crate::error::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedPathStep {
    pub step_number: u32,
    pub title: String,
    pub description: String,
    pub skills_to_learn: Vec<String>,
    pub duration_weeks: f64,
    pub success_criteria: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryPath {
    pub steps: Vec<GeneratedPathStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedFallbackPath {
    pub alternative_role: String,
    pub reason: String,
    pub success_probability: Option<f64>,
}

/// Generated career path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CareerPath {
    pub target_role: String,
    pub estimated_duration_months: Option<f64>,
    pub success_probability: f64,
    pub primary_path: PrimaryPath,
    pub fallback_paths: Vec<GeneratedFallbackPath>,
    pub risk_factors: Vec<String>,
}

const PATH_SCHEMA: &str = r#"{
  "target_role": "Data Analyst",
  "estimated_duration_months": 9,
  "success_probability": 0.7,
  "primary_path": {
    "steps": [
      {"step_number": 1, "title": "...", "description": "...", "skills_to_learn": ["..."],
       "duration_weeks": 4, "success_criteria": "...", "difficulty": "easy|medium|hard"}
    ]
  },
  "fallback_paths": [{"alternative_role": "...", "reason": "...", "success_probability": 0.8}],
  "risk_factors": ["..."]
}"#;

/// Plan for the interpreted goal, or for an explicit role after a reroute.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    pub target_role: Option<String>,
}

pub struct PathStage;

fn planned_role(ctx: &UserContext, params: &PathParams) -> String {
    params
        .target_role
        .clone()
        .or_else(|| ctx.goal.interpreted.as_ref().map(|g| g.role_title.clone()))
        .unwrap_or_default()
}

fn weeks(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round().max(1.0) as u32
    } else {
        4
    }
}

impl Stage for PathStage {
    type Params = PathParams;
    type Output = CareerPath;

    const AGENT: AgentKind = AgentKind::PathPlanning;
    const NAME: &'static str = "path_planning";

    fn check(&self, ctx: &UserContext, _params: &PathParams) -> Result<(), AgentError> {
        require(ctx.goal.interpreted.is_some(), Prerequisite::GoalInterpretation)?;
        require(
            ctx.readiness.confidence_score.is_some(),
            Prerequisite::ReadinessAssessment,
        )?;
        require(ctx.market.snapshot.is_some(), Prerequisite::MarketAnalysis)
    }

    fn prompt(&self, ctx: &UserContext, params: &PathParams) -> StagePrompt {
        let interpreted = ctx.goal.interpreted.as_ref();
        stage_prompt(
            "career path planner",
            "Design a step-by-step path to the target role. Order steps from fundamentals \
             to job readiness, list the skills each step teaches, and suggest fallback roles \
             in case the primary path does not work out.",
            &json!({
                "target_role": planned_role(ctx, params),
                "required_skills": interpreted.map(|g| g.required_skills.clone()),
                "duration_weeks": ctx.goal.duration_weeks,
                "current_skills": ctx.profile.all_skills(),
                "experience_level": ctx.profile.experience_level,
                "readiness_confidence": ctx.readiness.confidence_score,
                "deviation_risk": ctx.readiness.deviation_risk,
                "market_demand": ctx.market.snapshot.as_ref().map(|m| m.demand_score),
                "in_demand_skills": ctx.market.snapshot.as_ref().map(|m| m.in_demand_skills.clone()),
                "previously_failed_roles": ctx.reroute_history.failed_paths.iter().map(|f| f.role.as_str()).collect::<Vec<_>>(),
            }),
            PATH_SCHEMA,
            0.5,
            2500,
        )
    }

    fn accept(&self, output: &CareerPath) -> bool {
        output
            .primary_path
            .steps
            .iter()
            .any(|s| !s.title.trim().is_empty())
    }

    fn fallback(&self, ctx: &UserContext, params: &PathParams) -> CareerPath {
        let role = planned_role(ctx, params);
        let titles = [
            ("Foundations", "Learn the fundamentals every {role} relies on.", "easy"),
            ("Core skills", "Build the core technical skills of a {role}.", "medium"),
            ("Applied projects", "Apply your skills in portfolio projects.", "medium"),
            ("Job readiness", "Prepare your portfolio and practise interviews for {role} positions.", "hard"),
        ];
        let required: Vec<String> = ctx
            .goal
            .interpreted
            .as_ref()
            .map(|g| g.required_skills.clone())
            .unwrap_or_default();

        let mut steps: Vec<GeneratedPathStep> = titles
            .iter()
            .enumerate()
            .map(|(i, (title, description, difficulty))| GeneratedPathStep {
                step_number: i as u32 + 1,
                title: format!("{title}: {role}"),
                description: description.replace("{role}", &role),
                skills_to_learn: Vec::new(),
                duration_weeks: 4.0,
                success_criteria: format!("Complete every action in the {} step", title.to_lowercase()),
                difficulty: difficulty.to_string(),
            })
            .collect();
        // Spread required skills over the first three steps.
        for (i, skill) in required.iter().enumerate() {
            steps[i % 3].skills_to_learn.push(skill.clone());
        }

        CareerPath {
            target_role: role,
            estimated_duration_months: Some(4.0),
            success_probability: 0.5,
            primary_path: PrimaryPath { steps },
            fallback_paths: ctx
                .market
                .snapshot
                .as_ref()
                .map(|m| {
                    m.adjacent_roles
                        .iter()
                        .map(|r| GeneratedFallbackPath {
                            alternative_role: r.role.clone(),
                            reason: r.reason.clone(),
                            success_probability: None,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            risk_factors: vec!["Path generated from defaults".to_string()],
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &CareerPath, params: &PathParams) {
        let role = match &params.target_role {
            Some(role) => role.clone(),
            None if !output.target_role.trim().is_empty() => output.target_role.trim().to_string(),
            None => planned_role(ctx, params),
        };

        let path = &mut ctx.active_path;
        match path.target_role.as_deref() {
            None => {
                path.pin_original_target_role(&role);
                path.target_role = Some(role.clone());
            }
            Some(current) if !current.eq_ignore_ascii_case(&role) => {
                path.switch_role(PathChangeKind::Replanned, &role, "Path re-planned");
            }
            Some(_) => {}
        }

        path.path_id = Some(Uuid::new_v4().to_string());
        path.steps = output
            .primary_path
            .steps
            .iter()
            .filter(|s| !s.title.trim().is_empty())
            .enumerate()
            .map(|(i, s)| PathStep {
                step_number: i as u32 + 1,
                title: s.title.trim().to_string(),
                description: s.description.clone(),
                skills: s.skills_to_learn.clone(),
                duration_weeks: weeks(s.duration_weeks),
                success_criteria: s.success_criteria.clone(),
                difficulty: s.difficulty.clone(),
            })
            .collect();
        path.fallback_paths = output
            .fallback_paths
            .iter()
            .filter(|f| !f.alternative_role.trim().is_empty())
            .map(|f| FallbackPath {
                role: f.alternative_role.trim().to_string(),
                reason: f.reason.clone(),
                success_probability: f.success_probability.map(unit_interval),
            })
            .collect();
        path.success_probability = unit_interval(output.success_probability);
        path.estimated_duration_months = output
            .estimated_duration_months
            .filter(|m| m.is_finite() && *m > 0.0);
        path.risk_factors = output.risk_factors.clone();
        path.created_at = Some(Utc::now());
    }
}

// ── Roadmap materialisation ─────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedRoadmapStep {
    pub title: String,
    pub description: String,
    pub skills: Vec<String>,
    pub duration_weeks: f64,
}

/// Generated roadmap outline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadmapPlan {
    pub steps: Vec<GeneratedRoadmapStep>,
}

const ROADMAP_SCHEMA: &str = r#"{
  "steps": [
    {"title": "...", "description": "...", "skills": ["..."], "duration_weeks": 3}
  ]
}"#;

/// Turns the active path into an ordered roadmap of steps.
pub struct RoadmapStage {
    pub max_steps: usize,
}

impl Default for RoadmapStage {
    fn default() -> Self {
        Self { max_steps: 5 }
    }
}

impl Stage for RoadmapStage {
    type Params = ();
    type Output = RoadmapPlan;

    const AGENT: AgentKind = AgentKind::PathPlanning;
    const NAME: &'static str = "roadmap_generation";

    fn check(&self, ctx: &UserContext, _params: &()) -> Result<(), AgentError> {
        require(
            ctx.active_path.is_planned() && !ctx.active_path.steps.is_empty(),
            Prerequisite::PathPlanning,
        )
    }

    fn prompt(&self, ctx: &UserContext, _params: &()) -> StagePrompt {
        stage_prompt(
            "roadmap designer",
            &format!(
                "Turn the career path into a roadmap of at most {} sequential steps. Each \
                 step must be concrete enough to generate practical actions from.",
                self.max_steps
            ),
            &json!({
                "target_role": ctx.active_path.target_role,
                "path_steps": ctx.active_path.steps,
                "timeline_months": ctx.active_path.estimated_duration_months,
                "modification_notes": ctx.active_path.modification_notes,
            }),
            ROADMAP_SCHEMA,
            0.4,
            2000,
        )
    }

    fn accept(&self, output: &RoadmapPlan) -> bool {
        output.steps.iter().any(|s| !s.title.trim().is_empty())
    }

    fn fallback(&self, ctx: &UserContext, _params: &()) -> RoadmapPlan {
        RoadmapPlan {
            steps: ctx
                .active_path
                .steps
                .iter()
                .map(|s| GeneratedRoadmapStep {
                    title: s.title.clone(),
                    description: s.description.clone(),
                    skills: s.skills.clone(),
                    duration_weeks: f64::from(s.duration_weeks),
                })
                .collect(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &RoadmapPlan, _params: &()) {
        ctx.reroute_history.archive_completed(&ctx.roadmap);

        let mut steps: Vec<Step> = output
            .steps
            .iter()
            .filter(|s| !s.title.trim().is_empty())
            .take(self.max_steps.max(1))
            .enumerate()
            .map(|(i, s)| Step {
                step_number: i as u32 + 1,
                title: s.title.trim().to_string(),
                description: s.description.clone(),
                skills: s.skills.clone(),
                duration_weeks: weeks(s.duration_weeks),
                status: StepStatus::Pending,
                actions: Vec::new(),
                completion_percentage: 0.0,
                completed_at: None,
            })
            .collect();
        if let Some(first) = steps.first_mut() {
            first.status = StepStatus::InProgress;
        }

        ctx.roadmap = Roadmap {
            roadmap_id: Some(Uuid::new_v4().to_string()),
            target_role: ctx.active_path.target_role.clone(),
            current_step_number: steps.first().map(|s| s.step_number),
            steps,
            completed_steps: Vec::new(),
            status: RoadmapStatus::InProgress,
            generated_at: Some(Utc::now()),
        };
        ctx.progress.reset_for_new_path();
        ctx.progress.raise_stage_to(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::model::{InterpretedGoal, MarketSnapshot, MarketTrend};

    fn planned_ctx() -> UserContext {
        let mut ctx = UserContext::new("p");
        ctx.goal.interpreted = Some(InterpretedGoal {
            role_title: "Data Analyst".into(),
            role_category: "data".into(),
            role_description: String::new(),
            required_skills: vec!["SQL".into(), "Excel".into(), "Statistics".into(), "Tableau".into()],
            responsibilities: vec![],
            clarity_score: 0.8,
            commitment_level: "high".into(),
            time_to_competency_months: Some(6),
            notes: None,
            interpreted_at: Utc::now(),
        });
        ctx.readiness.confidence_score = Some(0.6);
        ctx.market.snapshot = Some(MarketSnapshot {
            role_title: "Data Analyst".into(),
            demand_score: 70,
            competition_level: "medium".into(),
            entry_barrier: "low".into(),
            trend: MarketTrend::Growing,
            in_demand_skills: vec![],
            adjacent_roles: vec![],
            notes: None,
            analyzed_at: Utc::now(),
        });
        ctx
    }

    #[test]
    fn path_requires_goal_then_readiness_then_market() {
        let mut ctx = UserContext::new("p");
        let check = |ctx: &UserContext| PathStage.check(ctx, &PathParams::default());
        assert!(matches!(check(&ctx), Err(AgentError::MissingPrerequisite(Prerequisite::GoalInterpretation))));

        ctx = planned_ctx();
        ctx.readiness.confidence_score = None;
        assert!(matches!(check(&ctx), Err(AgentError::MissingPrerequisite(Prerequisite::ReadinessAssessment))));

        ctx = planned_ctx();
        ctx.market.snapshot = None;
        assert!(matches!(check(&ctx), Err(AgentError::MissingPrerequisite(Prerequisite::MarketAnalysis))));

        assert!(check(&planned_ctx()).is_ok());
    }

    #[test]
    fn fallback_path_covers_required_skills() {
        let mut ctx = planned_ctx();
        let out = PathStage.fallback(&ctx, &PathParams::default());
        PathStage.apply(&mut ctx, &out, &PathParams::default());

        assert_eq!(ctx.active_path.target_role.as_deref(), Some("Data Analyst"));
        assert_eq!(ctx.active_path.original_target_role(), Some("Data Analyst"));
        let skills: Vec<&String> = ctx.active_path.step_skills().collect();
        for required in ["SQL", "Excel", "Statistics", "Tableau"] {
            assert!(skills.iter().any(|s| s.as_str() == required), "{required} missing");
        }
    }

    #[test]
    fn replanning_to_a_new_role_is_logged() {
        let mut ctx = planned_ctx();
        let out = PathStage.fallback(&ctx, &PathParams::default());
        PathStage.apply(&mut ctx, &out, &PathParams::default());

        let mut other = out.clone();
        other.target_role = "Business Analyst".into();
        PathStage.apply(&mut ctx, &other, &PathParams::default());

        assert_eq!(ctx.active_path.target_role.as_deref(), Some("Business Analyst"));
        assert_eq!(ctx.active_path.original_target_role(), Some("Data Analyst"));
        assert_eq!(ctx.active_path.change_history.len(), 1);
        assert_eq!(ctx.active_path.change_history[0].kind, PathChangeKind::Replanned);
    }

    #[test]
    fn roadmap_starts_at_step_one() {
        let mut ctx = planned_ctx();
        let path = PathStage.fallback(&ctx, &PathParams::default());
        PathStage.apply(&mut ctx, &path, &PathParams::default());

        let stage = RoadmapStage { max_steps: 3 };
        assert!(stage.check(&ctx, &()).is_ok());
        let plan = stage.fallback(&ctx, &());
        stage.apply(&mut ctx, &plan, &());

        assert_eq!(ctx.roadmap.steps.len(), 3);
        assert_eq!(ctx.roadmap.current_step_number, Some(1));
        assert_eq!(ctx.roadmap.steps[0].status, StepStatus::InProgress);
        assert_eq!(ctx.roadmap.steps[1].status, StepStatus::Pending);
        assert_eq!(ctx.progress.active_stage(), 1);
    }

    #[test]
    fn regenerating_the_roadmap_keeps_the_active_stage() {
        let mut ctx = planned_ctx();
        let path = PathStage.fallback(&ctx, &PathParams::default());
        PathStage.apply(&mut ctx, &path, &PathParams::default());
        ctx.progress.raise_stage_to(3);

        let stage = RoadmapStage::default();
        let plan = stage.fallback(&ctx, &());
        stage.apply(&mut ctx, &plan, &());

        assert_eq!(ctx.roadmap.current_step_number, Some(1));
        assert_eq!(ctx.progress.active_stage(), 3);
    }

    #[test]
    fn roadmap_requires_a_path() {
        let ctx = planned_ctx();
        assert!(matches!(
            RoadmapStage::default().check(&ctx, &()),
            Err(AgentError::MissingPrerequisite(Prerequisite::PathPlanning))
        ));
    }
}
