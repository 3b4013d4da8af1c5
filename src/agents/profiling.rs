//! Profiling agent: turns raw background into a structured skill profile.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::prompts::stage_prompt;
use super::{AgentKind, Stage, StagePrompt, unit_interval};
use crate::context::UserContext;
use crate::context::model::ProfileInputs;
use crate::error::AgentError;

/// Generated profile analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileAnalysis {
    pub experience_level: String,
    pub technical_skills: BTreeMap<String, Vec<String>>,
    pub soft_skills: Vec<String>,
    pub strength_areas: Vec<String>,
    pub weakness_areas: Vec<String>,
    pub learning_capacity: String,
    pub risk_factors: Vec<String>,
    pub profile_confidence: f64,
}

const SCHEMA: &str = r#"{
  "experience_level": "beginner|intermediate|advanced",
  "technical_skills": {"programming": ["python"], "tools": ["git"]},
  "soft_skills": ["communication"],
  "strength_areas": ["..."],
  "weakness_areas": ["..."],
  "learning_capacity": "low|moderate|high",
  "risk_factors": ["..."],
  "profile_confidence": 0.75
}"#;

pub struct ProfilingStage;

impl Stage for ProfilingStage {
    type Params = ProfileInputs;
    type Output = ProfileAnalysis;

    const AGENT: AgentKind = AgentKind::Profiling;
    const NAME: &'static str = "profile_analysis";

    fn check(&self, _ctx: &UserContext, _params: &ProfileInputs) -> Result<(), AgentError> {
        Ok(())
    }

    fn prompt(&self, _ctx: &UserContext, params: &ProfileInputs) -> StagePrompt {
        stage_prompt(
            "student profiling analyst",
            "Analyse the student's background. Group technical skills by category, \
             identify strengths, weaknesses and risk factors, and estimate how confident \
             you are in this profile (0-1).",
            &json!({
                "education": params.education,
                "experience": params.experience,
                "skills": params.skills,
                "projects": params.projects,
                "interests": params.interests,
            }),
            SCHEMA,
            0.3,
            1500,
        )
    }

    fn accept(&self, output: &ProfileAnalysis) -> bool {
        !output.experience_level.trim().is_empty() || !output.technical_skills.is_empty()
    }

    fn fallback(&self, _ctx: &UserContext, params: &ProfileInputs) -> ProfileAnalysis {
        let mut technical_skills = BTreeMap::new();
        if !params.skills.is_empty() {
            technical_skills.insert("declared".to_string(), params.skills.clone());
        }
        ProfileAnalysis {
            experience_level: if params.experience.as_deref().is_some_and(|e| !e.trim().is_empty()) {
                "intermediate".to_string()
            } else {
                "beginner".to_string()
            },
            technical_skills,
            soft_skills: Vec::new(),
            strength_areas: params.skills.iter().take(3).cloned().collect(),
            weakness_areas: Vec::new(),
            learning_capacity: "moderate".to_string(),
            risk_factors: vec!["Profile could not be analysed in depth".to_string()],
            profile_confidence: 0.3,
        }
    }

    fn apply(&self, ctx: &mut UserContext, output: &ProfileAnalysis, params: &ProfileInputs) {
        let profile = &mut ctx.profile;
        profile.inputs = params.clone();
        profile.experience_level = Some(output.experience_level.clone());
        profile.technical_skills = output.technical_skills.clone();
        profile.soft_skills = output.soft_skills.clone();
        profile.strength_areas = output.strength_areas.clone();
        profile.weakness_areas = output.weakness_areas.clone();
        profile.learning_capacity = Some(output.learning_capacity.clone());
        profile.risk_factors = output.risk_factors.clone();
        profile.confidence = unit_interval(output.profile_confidence);
        profile.analyzed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agents::AgentRunner;
    use crate::agents::testing::{ScriptedLlm, run_stage};
    use crate::context::{ContextStore, MemoryStore};

    fn inputs() -> ProfileInputs {
        ProfileInputs {
            education: Some("BSc Mathematics".into()),
            experience: None,
            skills: vec!["Python".into(), "SQL".into()],
            projects: vec!["Sales dashboard".into()],
            interests: vec!["data".into()],
        }
    }

    #[tokio::test]
    async fn parsed_profile_is_stored() {
        let reply = r#"```json
        {"experience_level": "beginner",
         "technical_skills": {"programming": ["Python"], "data": ["SQL"]},
         "soft_skills": ["curiosity"], "strength_areas": ["math"],
         "weakness_areas": ["ml"], "learning_capacity": "high",
         "risk_factors": [], "profile_confidence": 82}
        ```"#;
        let store = Arc::new(MemoryStore::new());
        let runner = AgentRunner::new(Arc::new(ScriptedLlm::new(vec![reply])));

        let result = run_stage(&runner, store.as_ref(), &ProfilingStage, "p1", &inputs())
            .await
            .unwrap();
        assert!(!result.used_fallback);

        let ctx = store.load("p1").await.unwrap().unwrap();
        assert!(ctx.profile.is_analyzed());
        assert_eq!(ctx.profile.confidence, 0.82);
        assert_eq!(ctx.profile.technical_skills["data"], vec!["SQL"]);
        assert_eq!(ctx.profile.inputs.education.as_deref(), Some("BSc Mathematics"));
    }

    #[test]
    fn fallback_keeps_declared_skills() {
        let ctx = UserContext::new("p2");
        let out = ProfilingStage.fallback(&ctx, &inputs());
        assert_eq!(out.experience_level, "beginner");
        assert_eq!(out.technical_skills["declared"], vec!["Python", "SQL"]);
        assert_eq!(out.profile_confidence, 0.3);
    }

    #[test]
    fn empty_output_is_rejected() {
        assert!(!ProfilingStage.accept(&ProfileAnalysis::default()));
    }
}
