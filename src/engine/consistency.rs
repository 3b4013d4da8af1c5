//! Consistency pass run after every reroute apply.

use serde::Serialize;
use tracing::info;

use crate::context::UserContext;
use crate::context::model::{PathStatus, RoadmapStatus, contains_ignore_case};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub issues: Vec<String>,
    pub corrections: Vec<String>,
    /// The current step has no open action; the caller should generate some.
    pub needs_actions: bool,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

fn goal_matches_role(goal: &str, role: &str) -> bool {
    let goal = goal.to_lowercase();
    let role = role.to_lowercase();
    goal.contains(&role) || role.contains(&goal)
}

/// Detect and fix drift between goal, path, roadmap and progress.
///
/// Running it twice in a row makes no further corrections.
pub fn reconcile(ctx: &mut UserContext) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();
    let Some(role) = ctx.active_path.target_role.clone() else {
        return report;
    };

    if let Some(goal) = ctx.goal.current.clone() {
        if !goal_matches_role(&goal, &role) {
            report
                .issues
                .push(format!("Goal '{goal}' does not match target role '{role}'"));
            ctx.goal.set_current(&role);
            report.corrections.push(format!("Goal updated to '{role}'"));
        }
    }
    if let Some(interpreted) = ctx.goal.interpreted.as_mut() {
        if !interpreted.role_title.eq_ignore_ascii_case(&role) {
            report.issues.push(format!(
                "Interpreted role '{}' differs from target role '{role}'",
                interpreted.role_title
            ));
            interpreted.role_title = role.clone();
            report
                .corrections
                .push(format!("Interpreted role updated to '{role}'"));
        }
    }

    let required = ctx
        .goal
        .interpreted
        .as_ref()
        .map(|g| g.required_skills.clone())
        .unwrap_or_default();
    let covered: Vec<String> = ctx.active_path.step_skills().cloned().collect();
    let missing: Vec<String> = required
        .into_iter()
        .filter(|s| !contains_ignore_case(&covered, s))
        .collect();
    if !missing.is_empty() {
        if let Some(last) = ctx.active_path.steps.last_mut() {
            report
                .issues
                .push(format!("Path does not cover: {}", missing.join(", ")));
            report.corrections.push(format!(
                "Added {} to step {}",
                missing.join(", "),
                last.step_number
            ));
            last.skills.extend(missing);
        }
    }

    if ctx.active_path.status == PathStatus::NotStarted && ctx.progress.completion_rate > 0.0 {
        report
            .issues
            .push("Path marked not started but has progress".to_string());
        ctx.active_path.status = PathStatus::InProgress;
        report.corrections.push("Path status set to in_progress".to_string());
    }

    let path_open = ctx.active_path.status != PathStatus::Completed;
    let roadmap_open = ctx.roadmap.is_generated() && ctx.roadmap.status != RoadmapStatus::Completed;
    if path_open && roadmap_open {
        let has_open = ctx
            .roadmap
            .current_step()
            .is_some_and(|step| step.has_open_action());
        if !has_open {
            report
                .issues
                .push("No pending action on the current step".to_string());
            report.needs_actions = true;
        }
    }

    for correction in &report.corrections {
        ctx.metadata.record_event("consistency_fix", correction.clone());
    }
    if !report.is_clean() {
        info!(
            user_id = %ctx.user_id,
            issues = report.issues.len(),
            corrections = report.corrections.len(),
            "Consistency pass applied"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::context::model::{Action, InterpretedGoal, PathStep, Roadmap, Step, StepStatus};

    fn ctx() -> UserContext {
        let mut ctx = UserContext::new("c");
        ctx.goal.set_current("Become a data scientist");
        ctx.goal.interpreted = Some(InterpretedGoal {
            role_title: "Data Analyst".into(),
            role_category: "data".into(),
            role_description: String::new(),
            required_skills: vec!["SQL".into(), "Tableau".into()],
            responsibilities: vec![],
            clarity_score: 0.8,
            commitment_level: "high".into(),
            time_to_competency_months: None,
            notes: None,
            interpreted_at: Utc::now(),
        });
        ctx.active_path.target_role = Some("Data Analyst".into());
        ctx.active_path.steps = vec![PathStep {
            step_number: 1,
            title: "SQL".into(),
            description: String::new(),
            skills: vec!["sql".into()],
            duration_weeks: 3,
            success_criteria: String::new(),
            difficulty: "easy".into(),
        }];
        ctx.roadmap = Roadmap {
            roadmap_id: Some("r".into()),
            target_role: Some("Data Analyst".into()),
            steps: vec![Step {
                step_number: 1,
                title: "SQL".into(),
                description: String::new(),
                skills: vec![],
                duration_weeks: 3,
                status: StepStatus::InProgress,
                actions: vec![],
                completion_percentage: 0.0,
                completed_at: None,
            }],
            current_step_number: Some(1),
            completed_steps: vec![],
            status: RoadmapStatus::InProgress,
            generated_at: None,
        };
        ctx.progress.completion_rate = 0.2;
        ctx
    }

    #[test]
    fn fixes_drift_and_flags_missing_actions() {
        let mut ctx = ctx();
        let report = reconcile(&mut ctx);

        assert_eq!(ctx.goal.current.as_deref(), Some("Data Analyst"));
        assert_eq!(ctx.goal.history.len(), 1);
        assert_eq!(ctx.active_path.steps[0].skills, vec!["sql", "Tableau"]);
        assert_eq!(ctx.active_path.status, PathStatus::InProgress);
        assert!(report.needs_actions);
        assert_eq!(report.corrections.len(), 3);
    }

    #[test]
    fn second_pass_makes_no_corrections() {
        let mut ctx = ctx();
        reconcile(&mut ctx);
        let events = ctx.metadata.event_count();
        let second = reconcile(&mut ctx);
        assert!(second.corrections.is_empty());
        assert_eq!(ctx.metadata.event_count(), events);
    }

    #[test]
    fn open_action_means_nothing_to_generate() {
        let mut ctx = ctx();
        ctx.roadmap.steps[0].actions.push(Action::new("a", "Query practice", ""));
        assert!(!reconcile(&mut ctx).needs_actions);
    }

    #[test]
    fn goal_containing_role_is_consistent() {
        let mut ctx = ctx();
        ctx.goal.set_current("I want to become a Data Analyst at a bank");
        reconcile(&mut ctx);
        assert_eq!(
            ctx.goal.current.as_deref(),
            Some("I want to become a Data Analyst at a bank")
        );
    }
}
