//! Feedback and learning agent: progress reviews and scoring of validation answers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::prompts::stage_prompt;
use super::{AgentKind, Prerequisite, Stage, StagePrompt, require, unit_interval};
use crate::context::UserContext;
use crate::context::model::{ActionEvaluation, ActionStatus, DeviationRisk, ProgressFeedback};
use crate::error::AgentError;

/// Generated progress review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressReview {
    pub overall_rating: String,
    pub velocity: String,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub recommendations: Vec<String>,
    pub encouragement: String,
    pub confidence_score: f64,
    pub deviation_risk: String,
}

const REVIEW_SCHEMA: &str = r#"{
  "overall_rating": "excellent|good|fair|needs_improvement",
  "velocity": "ahead|on_track|behind",
  "strengths": ["..."],
  "concerns": ["..."],
  "recommendations": ["..."],
  "encouragement": "...",
  "confidence_score": 0.7,
  "deviation_risk": "low|medium|high"
}"#;

/// Reviews progress so far and refreshes the readiness estimate.
pub struct FeedbackStage;

fn has_completed_action(ctx: &UserContext) -> bool {
    ctx.roadmap
        .actions()
        .any(|a| a.agent_satisfied || a.status == ActionStatus::Completed)
}

impl Stage for FeedbackStage {
    type Params = ();
    type Output = ProgressReview;

    const AGENT: AgentKind = AgentKind::FeedbackLearning;
    const NAME: &'static str = "progress_feedback";

    fn check(&self, ctx: &UserContext, _params: &()) -> Result<(), AgentError> {
        require(ctx.active_path.is_planned(), Prerequisite::PathPlanning)?;
        require(has_completed_action(ctx), Prerequisite::CompletedActions)
    }

    fn prompt(&self, ctx: &UserContext, _params: &()) -> StagePrompt {
        let done: Vec<_> = ctx
            .roadmap
            .actions()
            .filter(|a| a.status == ActionStatus::Completed)
            .map(|a| {
                json!({
                    "title": a.title,
                    "validated": a.agent_satisfied,
                    "score": a.evaluation.as_ref().map(|e| e.total_score),
                    "attempts": a.attempts,
                    "hours_spent": a.hours_spent,
                })
            })
            .collect();
        stage_prompt(
            "progress coach",
            "Review the student's progress on their roadmap. Rate it, judge their velocity, \
             and update your confidence (0-1) that they will reach the target role.",
            &json!({
                "target_role": ctx.active_path.target_role,
                "current_step": ctx.roadmap.current_step().map(|s| s.title.as_str()),
                "completed_steps": ctx.roadmap.completed_steps.len(),
                "total_steps": ctx.roadmap.steps.len(),
                "completion_rate": ctx.progress.completion_rate,
                "hours_spent": ctx.progress.time_spent_hours,
                "completed_actions": done,
                "blockers": ctx.progress.blockers.iter().rev().take(5).map(|b| b.description.as_str()).collect::<Vec<_>>(),
            }),
            REVIEW_SCHEMA,
            0.5,
            1200,
        )
    }

    fn accept(&self, output: &ProgressReview) -> bool {
        !output.overall_rating.trim().is_empty()
    }

    fn fallback(&self, ctx: &UserContext, _params: &()) -> ProgressReview {
        ProgressReview {
            overall_rating: "fair".to_string(),
            velocity: "on_track".to_string(),
            strengths: Vec::new(),
            concerns: Vec::new(),
            recommendations: vec!["Keep working through the actions of your current step".to_string()],
            encouragement: "Every completed action moves you closer to your goal.".to_string(),
            confidence_score: ctx.readiness.confidence_score.unwrap_or(0.5),
            deviation_risk: ctx
                .readiness
                .deviation_risk
                .unwrap_or(DeviationRisk::Medium)
                .to_string(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &ProgressReview, _params: &()) {
        let confidence = unit_interval(output.confidence_score);
        let risk = DeviationRisk::parse_lenient(&output.deviation_risk);
        ctx.feedback = Some(ProgressFeedback {
            overall_rating: output.overall_rating.clone(),
            velocity: output.velocity.clone(),
            strengths: output.strengths.clone(),
            concerns: output.concerns.clone(),
            recommendations: output.recommendations.clone(),
            encouragement: output.encouragement.clone(),
            confidence_score: confidence,
            deviation_risk: risk,
            generated_at: Utc::now(),
        });
        ctx.readiness.confidence_score = Some(confidence);
        ctx.readiness.deviation_risk = Some(risk);
    }
}

// ── Answer evaluation ───────────────────────────────────────────────

/// Generated scores for a set of validation answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerEvaluation {
    /// 0–3 per question.
    pub individual_scores: Vec<f64>,
    pub total_score: f64,
    pub ready_to_proceed: bool,
    pub feedback: String,
    pub recommendation: String,
    #[serde(skip)]
    pub fallback: bool,
}

const EVALUATION_SCHEMA: &str = r#"{
  "individual_scores": [2, 3, 1],
  "total_score": 6,
  "ready_to_proceed": true,
  "feedback": "...",
  "recommendation": "..."
}"#;

#[derive(Debug, Clone, Default)]
pub struct EvaluationParams {
    pub action_id: String,
    pub answers: Vec<String>,
}

/// Scores validation answers. Deciding what the score means is left to the
/// progression engine.
pub struct EvaluationStage {
    pub max_score: u8,
}

impl Default for EvaluationStage {
    fn default() -> Self {
        Self { max_score: 9 }
    }
}

impl EvaluationStage {
    fn clamp_score(&self, value: f64) -> u8 {
        if value.is_finite() {
            value.round().clamp(0.0, f64::from(self.max_score)) as u8
        } else {
            0
        }
    }
}

impl Stage for EvaluationStage {
    type Params = EvaluationParams;
    type Output = AnswerEvaluation;

    const AGENT: AgentKind = AgentKind::FeedbackLearning;
    const NAME: &'static str = "answer_evaluation";

    fn check(&self, ctx: &UserContext, params: &EvaluationParams) -> Result<(), AgentError> {
        require(ctx.active_path.is_planned(), Prerequisite::PathPlanning)?;
        let (_, action) = ctx.roadmap.find_action(&params.action_id).ok_or_else(|| {
            AgentError::ActionNotFound {
                action_id: params.action_id.clone(),
            }
        })?;
        require(!action.questions.is_empty(), Prerequisite::ValidationQuestions)?;
        if action.status != ActionStatus::Completed || action.agent_satisfied {
            return Err(AgentError::ActionNotReady {
                action_id: params.action_id.clone(),
                reason: "only completed, unvalidated actions can be evaluated".into(),
            });
        }
        if params.answers.iter().all(|a| a.trim().is_empty()) {
            return Err(AgentError::InvalidInput("no validation answers supplied".into()));
        }
        Ok(())
    }

    fn prompt(&self, ctx: &UserContext, params: &EvaluationParams) -> StagePrompt {
        let action = ctx.roadmap.find_action(&params.action_id).map(|(_, a)| a);
        let pairs: Vec<_> = action
            .map(|a| {
                a.questions
                    .iter()
                    .zip(params.answers.iter().map(String::as_str).chain(std::iter::repeat("")))
                    .map(|(q, ans)| json!({"question": q, "answer": ans}))
                    .collect()
            })
            .unwrap_or_default();
        stage_prompt(
            "learning validator",
            &format!(
                "Score each answer from 0 to 3 for how convincingly it shows the action was \
                 completed. The total is out of {}. Be strict with vague answers.",
                self.max_score
            ),
            &json!({
                "action": action.map(|a| json!({
                    "title": a.title,
                    "description": a.description,
                    "success_criteria": a.success_criteria,
                })),
                "answers": pairs,
            }),
            EVALUATION_SCHEMA,
            0.2,
            1000,
        )
    }

    fn accept(&self, output: &AnswerEvaluation) -> bool {
        !output.individual_scores.is_empty() || output.total_score > 0.0 || !output.feedback.is_empty()
    }

    fn fallback(&self, _ctx: &UserContext, _params: &EvaluationParams) -> AnswerEvaluation {
        AnswerEvaluation {
            individual_scores: Vec::new(),
            total_score: 0.0,
            ready_to_proceed: false,
            feedback: "Your answers could not be evaluated right now. Please submit them again.".to_string(),
            recommendation: "resubmit".to_string(),
            fallback: true,
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &AnswerEvaluation, params: &EvaluationParams) {
        let individual: Vec<u8> = output
            .individual_scores
            .iter()
            .map(|s| if s.is_finite() { s.round().clamp(0.0, 3.0) as u8 } else { 0 })
            .collect();
        let total = if output.total_score > 0.0 {
            self.clamp_score(output.total_score)
        } else {
            self.clamp_score(individual.iter().map(|s| f64::from(*s)).sum())
        };
        let max = f64::from(self.max_score.max(1));

        if let Some((_, action)) = ctx.roadmap.find_action_mut(&params.action_id) {
            action.answers = params.answers.clone();
            action.evaluation = Some(ActionEvaluation {
                total_score: total,
                individual_scores: individual,
                feedback: output.feedback.clone(),
                recommendation: output.recommendation.clone(),
                fallback: output.fallback,
                evaluated_at: Utc::now(),
            });
            if !output.fallback {
                action.relevance_score = f64::from(total) / max;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::model::{Action, Roadmap, RoadmapStatus, Step, StepStatus};

    fn ctx_with_action() -> UserContext {
        let mut ctx = UserContext::new("f");
        ctx.active_path.target_role = Some("Data Analyst".into());
        let mut action = Action::new("a1", "Study SQL", "");
        action.status = ActionStatus::Completed;
        action.questions = vec!["What did you learn?".into()];
        ctx.roadmap = Roadmap {
            roadmap_id: Some("r".into()),
            target_role: Some("Data Analyst".into()),
            steps: vec![Step {
                step_number: 1,
                title: "SQL".into(),
                description: String::new(),
                skills: vec![],
                duration_weeks: 2,
                status: StepStatus::InProgress,
                actions: vec![action],
                completion_percentage: 0.0,
                completed_at: None,
            }],
            current_step_number: Some(1),
            completed_steps: vec![],
            status: RoadmapStatus::InProgress,
            generated_at: None,
        };
        ctx
    }

    #[test]
    fn feedback_needs_a_completed_action() {
        let mut ctx = ctx_with_action();
        ctx.roadmap.steps[0].actions[0].status = ActionStatus::Pending;
        assert!(matches!(
            FeedbackStage.check(&ctx, &()),
            Err(AgentError::MissingPrerequisite(Prerequisite::CompletedActions))
        ));
    }

    #[test]
    fn feedback_updates_readiness() {
        let mut ctx = ctx_with_action();
        let review = ProgressReview {
            overall_rating: "good".into(),
            confidence_score: 35.0,
            deviation_risk: "High".into(),
            ..Default::default()
        };
        FeedbackStage.apply(&mut ctx, &review, &());
        assert_eq!(ctx.readiness.confidence_score, Some(0.35));
        assert_eq!(ctx.readiness.deviation_risk, Some(DeviationRisk::High));
        assert_eq!(ctx.feedback.unwrap().overall_rating, "good");
    }

    #[test]
    fn evaluation_totals_individual_scores_when_missing() {
        let mut ctx = ctx_with_action();
        let params = EvaluationParams {
            action_id: "a1".into(),
            answers: vec!["joins and grouping".into()],
        };
        let output = AnswerEvaluation {
            individual_scores: vec![3.0, 2.0, 2.4],
            feedback: "solid".into(),
            ..Default::default()
        };
        EvaluationStage::default().apply(&mut ctx, &output, &params);

        let action = &ctx.roadmap.steps[0].actions[0];
        let eval = action.evaluation.as_ref().unwrap();
        assert_eq!(eval.total_score, 7);
        assert!((action.relevance_score - 7.0 / 9.0).abs() < 1e-9);
        assert_eq!(action.answers, vec!["joins and grouping"]);
        assert!(action.is_validated(6));
    }

    #[test]
    fn fallback_evaluation_is_marked() {
        let mut ctx = ctx_with_action();
        let params = EvaluationParams {
            action_id: "a1".into(),
            answers: vec!["x".into()],
        };
        let stage = EvaluationStage::default();
        let out = stage.fallback(&ctx, &params);
        stage.apply(&mut ctx, &out, &params);
        let action = &ctx.roadmap.steps[0].actions[0];
        assert!(action.evaluation.as_ref().unwrap().fallback);
        assert!(!action.is_validated(0));
    }

    #[test]
    fn evaluation_requires_questions() {
        let mut ctx = ctx_with_action();
        ctx.roadmap.steps[0].actions[0].questions.clear();
        let params = EvaluationParams {
            action_id: "a1".into(),
            answers: vec!["x".into()],
        };
        assert!(matches!(
            EvaluationStage::default().check(&ctx, &params),
            Err(AgentError::MissingPrerequisite(Prerequisite::ValidationQuestions))
        ));
    }
}
