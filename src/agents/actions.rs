//! Action recommendation agent: practical actions for a roadmap step, and the
//! validation questions asked once an action is done.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::prompts::stage_prompt;
use super::{AgentKind, Prerequisite, Stage, StagePrompt, require};
use crate::context::UserContext;
use crate::context::model::{Action, ActionStatus, StepStatus};
use crate::error::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedAction {
    pub title: String,
    pub description: String,
    pub action_type: String,
    pub estimated_hours: f64,
    pub priority: String,
    pub success_criteria: String,
}

/// Generated actions for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPlan {
    pub actions: Vec<GeneratedAction>,
}

const ACTIONS_SCHEMA: &str = r#"{
  "actions": [
    {"title": "...", "description": "...", "action_type": "learning|practice|project|networking",
     "estimated_hours": 6, "priority": "high|medium|low", "success_criteria": "..."}
  ]
}"#;

/// Which step to fill; `None` means the roadmap's current step.
#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    pub step_number: Option<u32>,
}

/// Generates the actions of one roadmap step.
pub struct ActionStage {
    pub actions_per_step: usize,
}

impl Default for ActionStage {
    fn default() -> Self {
        Self { actions_per_step: 3 }
    }
}

fn target_step(ctx: &UserContext, params: &ActionParams) -> Option<u32> {
    params.step_number.or(ctx.roadmap.current_step_number)
}

impl Stage for ActionStage {
    type Params = ActionParams;
    type Output = ActionPlan;

    const AGENT: AgentKind = AgentKind::ActionRecommendation;
    const NAME: &'static str = "action_generation";

    fn check(&self, ctx: &UserContext, params: &ActionParams) -> Result<(), AgentError> {
        require(ctx.active_path.is_planned(), Prerequisite::PathPlanning)?;
        require(ctx.roadmap.is_generated(), Prerequisite::RoadmapGeneration)?;
        match target_step(ctx, params) {
            Some(n) if ctx.roadmap.step(n).is_some() => Ok(()),
            Some(n) => Err(AgentError::InvalidInput(format!("roadmap has no step {n}"))),
            None => Err(AgentError::InvalidInput("roadmap has no current step".into())),
        }
    }

    fn prompt(&self, ctx: &UserContext, params: &ActionParams) -> StagePrompt {
        let step = target_step(ctx, params).and_then(|n| ctx.roadmap.step(n));
        stage_prompt(
            "learning coach",
            &format!(
                "Recommend {} concrete, practical actions the student can finish this week \
                 to make progress on the roadmap step. Each action needs a measurable success \
                 criterion.",
                self.actions_per_step
            ),
            &json!({
                "target_role": ctx.active_path.target_role,
                "step": step.map(|s| json!({
                    "title": s.title,
                    "description": s.description,
                    "skills": s.skills,
                    "duration_weeks": s.duration_weeks,
                })),
                "current_skills": ctx.profile.all_skills(),
                "learning_capacity": ctx.profile.learning_capacity,
                "already_done": step.map(|s| s.actions.iter().filter(|a| a.agent_satisfied).map(|a| a.title.as_str()).collect::<Vec<_>>()),
            }),
            ACTIONS_SCHEMA,
            0.6,
            1500,
        )
    }

    fn accept(&self, output: &ActionPlan) -> bool {
        output.actions.iter().any(|a| !a.title.trim().is_empty())
    }

    fn fallback(&self, ctx: &UserContext, params: &ActionParams) -> ActionPlan {
        let step = target_step(ctx, params).and_then(|n| ctx.roadmap.step(n));
        let topic = step
            .and_then(|s| s.skills.first().cloned())
            .or_else(|| step.map(|s| s.title.clone()))
            .unwrap_or_else(|| "the current step".to_string());
        let templates = [
            ("Study {topic}", "Work through a structured tutorial or course module on {topic}.", "learning", "Summarise the key concepts in your own words"),
            ("Practise {topic}", "Complete a set of hands-on exercises that use {topic}.", "practice", "Finish the exercises without looking up solutions"),
            ("Build a mini project with {topic}", "Create a small project that applies {topic} end to end.", "project", "Publish the project with a short write-up"),
        ];
        ActionPlan {
            actions: templates
                .iter()
                .cycle()
                .take(self.actions_per_step.max(1))
                .map(|(title, description, kind, criteria)| GeneratedAction {
                    title: title.replace("{topic}", &topic),
                    description: description.replace("{topic}", &topic),
                    action_type: kind.to_string(),
                    estimated_hours: 4.0,
                    priority: "medium".to_string(),
                    success_criteria: criteria.to_string(),
                })
                .collect(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &ActionPlan, params: &ActionParams) {
        let Some(step) = target_step(ctx, params).and_then(|n| ctx.roadmap.step_mut(n)) else {
            return;
        };
        // Satisfied actions stay; everything unfinished is replaced.
        step.actions.retain(|a| a.agent_satisfied);
        let fresh = output
            .actions
            .iter()
            .filter(|a| !a.title.trim().is_empty())
            .take(self.actions_per_step.max(1))
            .map(|a| {
                let mut action = Action::new(&Uuid::new_v4().to_string(), a.title.trim(), &a.description);
                if !a.action_type.is_empty() {
                    action.action_type = a.action_type.clone();
                }
                if a.estimated_hours.is_finite() && a.estimated_hours > 0.0 {
                    action.estimated_hours = a.estimated_hours;
                }
                if !a.priority.is_empty() {
                    action.priority = a.priority.to_ascii_lowercase();
                }
                action.success_criteria = a.success_criteria.clone();
                action
            });
        step.actions.extend(fresh);
        if step.status == StepStatus::Pending {
            step.status = StepStatus::InProgress;
        }
        step.completion_percentage = step.completion_ratio() * 100.0;
    }
}

// ── Validation questions ────────────────────────────────────────────

/// Generated validation questions for one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationQuestions {
    pub questions: Vec<String>,
}

const QUESTIONS_SCHEMA: &str = r#"{
  "questions": ["...", "..."]
}"#;

const DEFAULT_QUESTIONS: [&str; 5] = [
    "What is the main objective of this action?",
    "What did you learn or accomplish?",
    "How did you know when you succeeded?",
    "What was the most challenging part?",
    "What would you improve next time?",
];

/// Generates the questions used to check that an action was really done.
pub struct ValidationQuestionStage {
    pub question_count: usize,
}

impl Default for ValidationQuestionStage {
    fn default() -> Self {
        Self { question_count: 5 }
    }
}

impl Stage for ValidationQuestionStage {
    /// The action id.
    type Params = String;
    type Output = ValidationQuestions;

    const AGENT: AgentKind = AgentKind::ActionRecommendation;
    const NAME: &'static str = "validation_questions";

    fn check(&self, ctx: &UserContext, action_id: &String) -> Result<(), AgentError> {
        require(ctx.active_path.is_planned(), Prerequisite::PathPlanning)?;
        require(ctx.roadmap.is_generated(), Prerequisite::RoadmapGeneration)?;
        let (_, action) = ctx
            .roadmap
            .find_action(action_id)
            .ok_or_else(|| AgentError::ActionNotFound { action_id: action_id.clone() })?;
        if action.status != ActionStatus::Completed {
            return Err(AgentError::ActionNotReady {
                action_id: action_id.clone(),
                reason: "mark the action complete before validating it".into(),
            });
        }
        Ok(())
    }

    fn prompt(&self, ctx: &UserContext, action_id: &String) -> StagePrompt {
        let action = ctx.roadmap.find_action(action_id).map(|(_, a)| a);
        stage_prompt(
            "learning validator",
            &format!(
                "Write {} short open questions that a student who genuinely completed the \
                 action can answer and one who skipped it cannot.",
                self.question_count
            ),
            &json!({
                "target_role": ctx.active_path.target_role,
                "action": action.map(|a| json!({
                    "title": a.title,
                    "description": a.description,
                    "success_criteria": a.success_criteria,
                })),
            }),
            QUESTIONS_SCHEMA,
            0.5,
            800,
        )
    }

    fn accept(&self, output: &ValidationQuestions) -> bool {
        output.questions.iter().any(|q| !q.trim().is_empty())
    }

    fn fallback(&self, _ctx: &UserContext, _action_id: &String) -> ValidationQuestions {
        ValidationQuestions {
            questions: DEFAULT_QUESTIONS
                .iter()
                .take(self.question_count.max(1))
                .map(|q| q.to_string())
                .collect(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &ValidationQuestions, action_id: &String) {
        if let Some((_, action)) = ctx.roadmap.find_action_mut(action_id) {
            action.questions = output
                .questions
                .iter()
                .map(|q| q.trim())
                .filter(|q| !q.is_empty())
                .take(self.question_count.max(1))
                .map(str::to_string)
                .collect();
            action.answers.clear();
        }
    }
}
