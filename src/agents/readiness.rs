//! Readiness agent: diagnostic questions, then an assessment of the answers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::prompts::stage_prompt;
use super::{AgentKind, Prerequisite, Stage, StagePrompt, require, unit_interval};
use crate::context::UserContext;
use crate::context::model::{DeviationRisk, DiagnosticQuestion, ReadinessVerdict};
use crate::error::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedQuestion {
    pub question: String,
    pub category: String,
    pub difficulty: String,
}

/// Generated diagnostic question set with an initial readiness estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticSet {
    pub diagnostic_questions: Vec<GeneratedQuestion>,
    pub confidence_score: f64,
    pub deviation_risk: String,
    pub key_gaps: Vec<String>,
    pub assessment_notes: String,
}

const QUESTIONS_SCHEMA: &str = r#"{
  "diagnostic_questions": [
    {"question": "...", "category": "technical|conceptual|motivation", "difficulty": "easy|medium|hard"}
  ],
  "confidence_score": 0.6,
  "deviation_risk": "low|medium|high",
  "key_gaps": ["..."],
  "assessment_notes": "..."
}"#;

/// Generates the diagnostic questions and a first confidence estimate.
pub struct ReadinessQuestionsStage {
    pub question_count: usize,
}

impl Default for ReadinessQuestionsStage {
    fn default() -> Self {
        Self { question_count: 5 }
    }
}

impl Stage for ReadinessQuestionsStage {
    type Params = ();
    type Output = DiagnosticSet;

    const AGENT: AgentKind = AgentKind::Readiness;
    const NAME: &'static str = "readiness_questions";

    fn check(&self, ctx: &UserContext, _params: &()) -> Result<(), AgentError> {
        require(ctx.goal.interpreted.is_some(), Prerequisite::GoalInterpretation)
    }

    fn prompt(&self, ctx: &UserContext, _params: &()) -> StagePrompt {
        let role = ctx.goal.interpreted.as_ref();
        stage_prompt(
            "readiness assessor",
            &format!(
                "Write {} diagnostic questions that reveal whether the student is ready to \
                 pursue the target role. Give an initial confidence estimate (0-1) and a \
                 deviation risk based on the profile.",
                self.question_count
            ),
            &json!({
                "target_role": role.map(|g| g.role_title.as_str()),
                "required_skills": role.map(|g| g.required_skills.clone()),
                "experience_level": ctx.profile.experience_level,
                "skills": ctx.profile.all_skills(),
                "weaknesses": ctx.profile.weakness_areas,
            }),
            QUESTIONS_SCHEMA,
            0.5,
            1500,
        )
    }

    fn accept(&self, output: &DiagnosticSet) -> bool {
        output
            .diagnostic_questions
            .iter()
            .any(|q| !q.question.trim().is_empty())
    }

    fn fallback(&self, ctx: &UserContext, _params: &()) -> DiagnosticSet {
        let role = ctx
            .goal
            .interpreted
            .as_ref()
            .map(|g| g.role_title.clone())
            .unwrap_or_else(|| "your target role".to_string());
        let templates = [
            ("What experience do you already have that relates to {role}?", "experience"),
            ("Which core skills for {role} are you most comfortable with?", "technical"),
            ("Describe a project you completed end to end.", "technical"),
            ("How many hours per week can you commit to learning?", "commitment"),
            ("Why do you want to become a {role}?", "motivation"),
        ];
        DiagnosticSet {
            diagnostic_questions: templates
                .iter()
                .take(self.question_count.max(1))
                .map(|(q, cat)| GeneratedQuestion {
                    question: q.replace("{role}", &role),
                    category: cat.to_string(),
                    difficulty: "medium".to_string(),
                })
                .collect(),
            confidence_score: 0.5,
            deviation_risk: "medium".to_string(),
            key_gaps: Vec::new(),
            assessment_notes: "Default diagnostic questions".to_string(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &DiagnosticSet, _params: &()) {
        let readiness = &mut ctx.readiness;
        readiness.questions = output
            .diagnostic_questions
            .iter()
            .filter(|q| !q.question.trim().is_empty())
            .take(self.question_count.max(1))
            .map(|q| DiagnosticQuestion {
                question: q.question.clone(),
                category: q.category.clone(),
                difficulty: q.difficulty.clone(),
            })
            .collect();
        readiness.answers.clear();
        readiness.confidence_score = Some(unit_interval(output.confidence_score));
        readiness.deviation_risk = Some(DeviationRisk::parse_lenient(&output.deviation_risk));
        readiness.key_gaps = output.key_gaps.clone();
        readiness.notes = (!output.assessment_notes.is_empty()).then(|| output.assessment_notes.clone());
        readiness.assessed_at = Some(Utc::now());
    }
}

// ── Answer assessment ───────────────────────────────────────────────

/// Generated readiness verdict after the student answered the diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessAssessment {
    pub confidence_score: f64,
    pub deviation_risk: String,
    pub readiness_verdict: String,
    pub key_gaps: Vec<String>,
    pub preparation_time_estimate_weeks: Option<f64>,
    pub assessment_notes: String,
}

const ASSESSMENT_SCHEMA: &str = r#"{
  "confidence_score": 0.65,
  "deviation_risk": "low|medium|high",
  "readiness_verdict": "ready|needs_preparation|not_ready",
  "key_gaps": ["..."],
  "preparation_time_estimate_weeks": 6,
  "assessment_notes": "..."
}"#;

/// Scores the student's answers to the diagnostic questions.
pub struct ReadinessAssessmentStage;

impl Stage for ReadinessAssessmentStage {
    type Params = Vec<String>;
    type Output = ReadinessAssessment;

    const AGENT: AgentKind = AgentKind::Readiness;
    const NAME: &'static str = "readiness_assessment";

    fn check(&self, ctx: &UserContext, answers: &Vec<String>) -> Result<(), AgentError> {
        require(ctx.goal.interpreted.is_some(), Prerequisite::GoalInterpretation)?;
        require(!ctx.readiness.questions.is_empty(), Prerequisite::ReadinessAssessment)?;
        if answers.iter().all(|a| a.trim().is_empty()) {
            return Err(AgentError::InvalidInput("no diagnostic answers supplied".into()));
        }
        Ok(())
    }

    fn prompt(&self, ctx: &UserContext, answers: &Vec<String>) -> StagePrompt {
        let pairs: Vec<_> = ctx
            .readiness
            .questions
            .iter()
            .zip(answers.iter().map(String::as_str).chain(std::iter::repeat("")))
            .map(|(q, a)| json!({"question": q.question, "answer": a}))
            .collect();
        stage_prompt(
            "readiness assessor",
            "Assess the student's answers to the diagnostic questions. Decide whether they \
             are ready for the target role, how confident you are (0-1), and what the \
             risk of them abandoning the path is.",
            &json!({
                "target_role": ctx.goal.interpreted.as_ref().map(|g| g.role_title.as_str()),
                "answers": pairs,
            }),
            ASSESSMENT_SCHEMA,
            0.3,
            1200,
        )
    }

    fn accept(&self, output: &ReadinessAssessment) -> bool {
        !output.readiness_verdict.trim().is_empty()
    }

    fn fallback(&self, _ctx: &UserContext, _answers: &Vec<String>) -> ReadinessAssessment {
        ReadinessAssessment {
            confidence_score: 0.5,
            deviation_risk: "medium".to_string(),
            readiness_verdict: "needs_preparation".to_string(),
            key_gaps: Vec::new(),
            preparation_time_estimate_weeks: None,
            assessment_notes: "Assessment unavailable; defaults applied".to_string(),
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &ReadinessAssessment, answers: &Vec<String>) {
        let readiness = &mut ctx.readiness;
        readiness.answers = answers.clone();
        readiness.confidence_score = Some(unit_interval(output.confidence_score));
        readiness.deviation_risk = Some(DeviationRisk::parse_lenient(&output.deviation_risk));
        readiness.verdict = Some(ReadinessVerdict::parse_lenient(&output.readiness_verdict));
        readiness.key_gaps = output.key_gaps.clone();
        readiness.preparation_weeks = output
            .preparation_time_estimate_weeks
            .filter(|w| w.is_finite() && *w >= 0.0)
            .map(|w| w.round() as u32);
        readiness.notes = (!output.assessment_notes.is_empty()).then(|| output.assessment_notes.clone());
        readiness.assessed_at = Some(Utc::now());
    }
}
