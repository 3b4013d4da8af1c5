//! Goal interpretation agent: maps a free-text goal onto a concrete role.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::prompts::stage_prompt;
use super::{AgentKind, Stage, StagePrompt, unit_interval};
use crate::context::UserContext;
use crate::context::model::InterpretedGoal;
use crate::error::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalParams {
    pub raw_goal: String,
    pub duration_weeks: Option<u32>,
}

/// Generated goal interpretation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalInterpretation {
    pub role_title: String,
    pub role_category: String,
    pub role_description: String,
    pub required_skills: Vec<String>,
    pub typical_responsibilities: Vec<String>,
    pub goal_clarity_score: f64,
    pub commitment_level: String,
    pub time_to_competency_months: Option<f64>,
    pub interpretation_notes: String,
}

const SCHEMA: &str = r#"{
  "role_title": "Data Analyst",
  "role_category": "data",
  "role_description": "...",
  "required_skills": ["SQL", "statistics"],
  "typical_responsibilities": ["..."],
  "goal_clarity_score": 0.8,
  "commitment_level": "low|medium|high",
  "time_to_competency_months": 9,
  "interpretation_notes": "..."
}"#;

pub struct GoalStage;

impl Stage for GoalStage {
    type Params = GoalParams;
    type Output = GoalInterpretation;

    const AGENT: AgentKind = AgentKind::GoalInterpretation;
    const NAME: &'static str = "goal_interpretation";

    fn check(&self, _ctx: &UserContext, params: &GoalParams) -> Result<(), AgentError> {
        if params.raw_goal.trim().is_empty() {
            return Err(AgentError::InvalidInput("goal must not be empty".into()));
        }
        Ok(())
    }

    fn prompt(&self, ctx: &UserContext, params: &GoalParams) -> StagePrompt {
        stage_prompt(
            "career goal interpreter",
            "Interpret the student's stated goal as one concrete target role. List the skills \
             the role requires, rate how clear the goal is (0-1) and estimate months to \
             reach entry-level competency.",
            &json!({
                "raw_goal": params.raw_goal,
                "duration_weeks": params.duration_weeks,
                "experience_level": ctx.profile.experience_level,
                "skills": ctx.profile.all_skills(),
                "interests": ctx.profile.inputs.interests,
            }),
            SCHEMA,
            0.3,
            1200,
        )
    }

    fn accept(&self, output: &GoalInterpretation) -> bool {
        !output.role_title.trim().is_empty()
    }

    fn fallback(&self, _ctx: &UserContext, params: &GoalParams) -> GoalInterpretation {
        GoalInterpretation {
            role_title: params.raw_goal.trim().to_string(),
            role_category: "general".to_string(),
            role_description: format!("Working towards: {}", params.raw_goal.trim()),
            required_skills: Vec::new(),
            typical_responsibilities: Vec::new(),
            goal_clarity_score: 0.5,
            commitment_level: "medium".to_string(),
            time_to_competency_months: params.duration_weeks.map(|w| f64::from(w) / 4.0),
            interpretation_notes: "Goal taken verbatim; interpretation unavailable".to_string(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &GoalInterpretation, params: &GoalParams) {
        let goal = &mut ctx.goal;
        goal.set_current(&params.raw_goal);
        if params.duration_weeks.is_some() {
            goal.duration_weeks = params.duration_weeks;
        }
        goal.interpreted = Some(InterpretedGoal {
            role_title: output.role_title.trim().to_string(),
            role_category: output.role_category.clone(),
            role_description: output.role_description.clone(),
            required_skills: output.required_skills.clone(),
            responsibilities: output.typical_responsibilities.clone(),
            clarity_score: unit_interval(output.goal_clarity_score),
            commitment_level: output.commitment_level.clone(),
            time_to_competency_months: output
                .time_to_competency_months
                .filter(|m| m.is_finite() && *m >= 0.0)
                .map(|m| m.round() as u32),
            notes: (!output.interpretation_notes.is_empty())
                .then(|| output.interpretation_notes.clone()),
            interpreted_at: Utc::now(),
        });
    }
}
