//! Step and action progression.
//!
//! An action is marked complete by the student, validated by scored answers,
//! and a step completes only when every one of its actions is both.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::UserContext;
use crate::context::model::{ActionEvaluation, ActionStatus, PathStatus, RoadmapStatus, StepStatus};
use crate::error::AgentError;

/// Pass mark and retry ceiling for action validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum total score (out of `max_score`) for an action to count.
    pub pass_score: u8,
    pub max_score: u8,
    /// Failed evaluations before a reroute is triggered.
    pub max_attempts: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pass_score: 6,
            max_score: 9,
            max_attempts: 3,
        }
    }
}

/// What a stored evaluation meant for its action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Passed { score: u8 },
    BelowThreshold { score: u8, attempts: u32, remaining: u32 },
    /// Attempt ceiling reached; the reroute machine should take over.
    Escalated { score: u8, attempts: u32, reason: String },
    /// The evaluation was a fallback; nothing is counted.
    Inconclusive,
}

/// What happened to the current step after a validation event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum StepTransition {
    /// Step not finished yet.
    None { completion: f64 },
    /// All actions done but at least one still lacks a passing evaluation.
    AwaitingValidation,
    Advanced { completed: u32, next: u32, active_stage: u32 },
    RoadmapCompleted { completed: u32 },
}

/// Mark an action done by the student and log the time spent.
pub fn mark_action_complete(
    ctx: &mut UserContext,
    action_id: &str,
    hours: f64,
) -> Result<(), AgentError> {
    if !hours.is_finite() || hours < 0.0 {
        return Err(AgentError::InvalidInput(format!("invalid hours: {hours}")));
    }
    let (_, action) = ctx
        .roadmap
        .find_action_mut(action_id)
        .ok_or_else(|| AgentError::ActionNotFound {
            action_id: action_id.to_string(),
        })?;
    if action.agent_satisfied {
        return Err(AgentError::ActionNotReady {
            action_id: action_id.to_string(),
            reason: "action is already validated".into(),
        });
    }

    action.status = ActionStatus::Completed;
    action.hours_spent += hours;
    action.completed_at = Some(Utc::now());
    let title = action.title.clone();

    ctx.progress.time_spent_hours += hours;
    if ctx.active_path.status == PathStatus::NotStarted {
        ctx.active_path.status = PathStatus::InProgress;
    }
    if let Some(step) = ctx.roadmap.current_step_mut() {
        step.completion_percentage = step.completion_ratio() * 100.0;
    }
    ctx.metadata
        .record_event("action_completed", format!("Completed action: {title}"));
    Ok(())
}

/// Interpret the evaluation just stored on `action_id`.
pub fn record_evaluation(
    ctx: &mut UserContext,
    action_id: &str,
    thresholds: Thresholds,
) -> Result<ValidationOutcome, AgentError> {
    let (_, action) = ctx
        .roadmap
        .find_action_mut(action_id)
        .ok_or_else(|| AgentError::ActionNotFound {
            action_id: action_id.to_string(),
        })?;
    let Some(evaluation) = action.evaluation.as_ref() else {
        return Err(AgentError::ActionNotReady {
            action_id: action_id.to_string(),
            reason: "no evaluation stored".into(),
        });
    };
    let score = evaluation.total_score;

    let outcome = if evaluation.fallback {
        ValidationOutcome::Inconclusive
    } else if score >= thresholds.pass_score {
        action.agent_satisfied = true;
        action.status = ActionStatus::Completed;
        ValidationOutcome::Passed { score }
    } else {
        action.attempts += 1;
        action.agent_satisfied = false;
        action.status = ActionStatus::Pending;
        if action.attempts >= thresholds.max_attempts {
            ValidationOutcome::Escalated {
                score,
                attempts: action.attempts,
                reason: format!("Repeated failure on action: {}", action.title),
            }
        } else {
            ValidationOutcome::BelowThreshold {
                score,
                attempts: action.attempts,
                remaining: thresholds.max_attempts - action.attempts,
            }
        }
    };

    info!(user_id = %ctx.user_id, action_id, score, ?outcome, "Validation recorded");
    recompute_progress(ctx);
    Ok(outcome)
}

/// Complete an action with a score the student supplies instead of answering questions.
///
/// The score is judged against the same pass mark as a generated evaluation.
pub fn record_manual_score(
    ctx: &mut UserContext,
    action_id: &str,
    score: u8,
    hours: f64,
    thresholds: Thresholds,
) -> Result<ValidationOutcome, AgentError> {
    if score > thresholds.max_score {
        return Err(AgentError::InvalidInput(format!(
            "score {score} exceeds the maximum of {}",
            thresholds.max_score
        )));
    }
    mark_action_complete(ctx, action_id, hours)?;
    let (_, action) = ctx
        .roadmap
        .find_action_mut(action_id)
        .ok_or_else(|| AgentError::ActionNotFound {
            action_id: action_id.to_string(),
        })?;
    let passing = score >= thresholds.pass_score;
    action.evaluation = Some(ActionEvaluation {
        total_score: score,
        individual_scores: Vec::new(),
        feedback: "Marked complete by student submission".to_string(),
        recommendation: if passing {
            "Proceed to the next action".to_string()
        } else {
            "Revisit this action before moving on".to_string()
        },
        fallback: false,
        evaluated_at: Utc::now(),
    });
    ctx.metadata
        .record_event("manual_score", format!("Action {action_id} scored {score} by the student"));
    record_evaluation(ctx, action_id, thresholds)
}

/// Complete and advance the current step if it is fully done and validated.
pub fn evaluate_current_step(ctx: &mut UserContext, thresholds: Thresholds) -> StepTransition {
    let Some(step) = ctx.roadmap.current_step_mut() else {
        return StepTransition::None { completion: 0.0 };
    };
    let ratio = step.completion_ratio();
    step.completion_percentage = ratio * 100.0;
    ctx.progress.stage_completion_rate = ratio;

    if ratio < 1.0 {
        recompute_progress(ctx);
        return StepTransition::None { completion: ratio };
    }
    if !step.all_validated(thresholds.pass_score) {
        recompute_progress(ctx);
        return StepTransition::AwaitingValidation;
    }

    step.status = StepStatus::Completed;
    step.completed_at = Some(Utc::now());
    let completed = step.step_number;
    if !ctx.roadmap.completed_steps.contains(&completed) {
        ctx.roadmap.completed_steps.push(completed);
    }

    let transition = match ctx.roadmap.next_step_after(completed) {
        Some(next) => {
            if let Some(next_step) = ctx.roadmap.step_mut(next) {
                next_step.status = StepStatus::InProgress;
            }
            ctx.roadmap.current_step_number = Some(next);
            ctx.progress.stage_completion_rate = 0.0;
            let active_stage = ctx.progress.advance_stage();
            ctx.metadata.record_event(
                "step_completed",
                format!("Step {completed} completed, moving to step {next}"),
            );
            StepTransition::Advanced {
                completed,
                next,
                active_stage,
            }
        }
        None => {
            ctx.roadmap.status = RoadmapStatus::Completed;
            ctx.active_path.status = PathStatus::Completed;
            ctx.metadata
                .record_event("roadmap_completed", format!("Final step {completed} completed"));
            StepTransition::RoadmapCompleted { completed }
        }
    };
    info!(user_id = %ctx.user_id, ?transition, "Step completed");
    recompute_progress(ctx);
    transition
}

/// `completion_rate = satisfied / materialised actions` for the current roadmap.
pub fn recompute_progress(ctx: &mut UserContext) {
    let total = ctx.roadmap.actions().count();
    ctx.progress.completion_rate = if total == 0 {
        0.0
    } else {
        ctx.roadmap.satisfied_actions() as f64 / total as f64
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::model::{Action, Roadmap, Step};

    fn step(n: u32, ids: &[&str]) -> Step {
        Step {
            step_number: n,
            title: format!("Step {n}"),
            description: String::new(),
            skills: vec![],
            duration_weeks: 2,
            status: if n == 1 { StepStatus::InProgress } else { StepStatus::Pending },
            actions: ids.iter().map(|id| Action::new(id, &format!("Action {id}"), "")).collect(),
            completion_percentage: 0.0,
            completed_at: None,
        }
    }

    fn ctx() -> UserContext {
        let mut ctx = UserContext::new("s");
        ctx.active_path.target_role = Some("Data Analyst".into());
        ctx.roadmap = Roadmap {
            roadmap_id: Some("r".into()),
            target_role: Some("Data Analyst".into()),
            steps: vec![step(1, &["a", "b"]), step(2, &["c"])],
            current_step_number: Some(1),
            completed_steps: vec![],
            status: RoadmapStatus::InProgress,
            generated_at: None,
        };
        ctx.progress.advance_stage();
        ctx
    }

    fn evaluate(ctx: &mut UserContext, id: &str, score: u8, fallback: bool) -> ValidationOutcome {
        let (_, action) = ctx.roadmap.find_action_mut(id).unwrap();
        action.evaluation = Some(ActionEvaluation {
            total_score: score,
            individual_scores: vec![],
            feedback: String::new(),
            recommendation: String::new(),
            fallback,
            evaluated_at: Utc::now(),
        });
        record_evaluation(ctx, id, Thresholds::default()).unwrap()
    }

    #[test]
    fn partial_step_does_not_advance() {
        let mut ctx = ctx();
        mark_action_complete(&mut ctx, "a", 2.0).unwrap();
        assert_eq!(evaluate(&mut ctx, "a", 7, false), ValidationOutcome::Passed { score: 7 });
        let transition = evaluate_current_step(&mut ctx, Thresholds::default());
        assert_eq!(transition, StepTransition::None { completion: 0.5 });
        assert_eq!(ctx.roadmap.current_step_number, Some(1));
        assert_eq!(ctx.progress.active_stage(), 1);
        assert!((ctx.progress.completion_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn completed_but_unvalidated_step_waits() {
        let mut ctx = ctx();
        mark_action_complete(&mut ctx, "a", 1.0).unwrap();
        mark_action_complete(&mut ctx, "b", 1.0).unwrap();
        evaluate(&mut ctx, "a", 9, false);
        assert_eq!(
            evaluate_current_step(&mut ctx, Thresholds::default()),
            StepTransition::AwaitingValidation
        );
        assert_eq!(ctx.roadmap.steps[0].completion_percentage, 100.0);
        assert_eq!(ctx.roadmap.steps[0].status, StepStatus::InProgress);
    }

    #[test]
    fn validated_step_advances_by_exactly_one() {
        let mut ctx = ctx();
        for id in ["a", "b"] {
            mark_action_complete(&mut ctx, id, 1.5).unwrap();
            evaluate(&mut ctx, id, 6, false);
        }
        let transition = evaluate_current_step(&mut ctx, Thresholds::default());
        assert_eq!(
            transition,
            StepTransition::Advanced { completed: 1, next: 2, active_stage: 2 }
        );
        assert_eq!(ctx.roadmap.completed_steps, vec![1]);
        assert_eq!(ctx.roadmap.step(2).unwrap().status, StepStatus::InProgress);
        assert_eq!(ctx.progress.time_spent_hours, 3.0);
        assert_eq!(ctx.active_path.status, PathStatus::InProgress);
    }

    #[test]
    fn last_step_completes_roadmap() {
        let mut ctx = ctx();
        for id in ["a", "b"] {
            mark_action_complete(&mut ctx, id, 1.0).unwrap();
            evaluate(&mut ctx, id, 8, false);
        }
        evaluate_current_step(&mut ctx, Thresholds::default());
        mark_action_complete(&mut ctx, "c", 1.0).unwrap();
        evaluate(&mut ctx, "c", 8, false);

        let transition = evaluate_current_step(&mut ctx, Thresholds::default());
        assert_eq!(transition, StepTransition::RoadmapCompleted { completed: 2 });
        assert_eq!(ctx.roadmap.status, RoadmapStatus::Completed);
        assert_eq!(ctx.active_path.status, PathStatus::Completed);
        assert_eq!(ctx.progress.completion_rate, 1.0);
        assert_eq!(ctx.progress.active_stage(), 2);
    }

    #[test]
    fn third_failure_escalates() {
        let mut ctx = ctx();
        for attempt in 1..=3u32 {
            mark_action_complete(&mut ctx, "a", 1.0).unwrap();
            let outcome = evaluate(&mut ctx, "a", 3, false);
            if attempt < 3 {
                assert_eq!(
                    outcome,
                    ValidationOutcome::BelowThreshold { score: 3, attempts: attempt, remaining: 3 - attempt }
                );
            } else {
                assert_eq!(
                    outcome,
                    ValidationOutcome::Escalated {
                        score: 3,
                        attempts: 3,
                        reason: "Repeated failure on action: Action a".into()
                    }
                );
            }
        }
        let (_, action) = ctx.roadmap.find_action("a").unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert!(!action.agent_satisfied);
    }

    #[test]
    fn fallback_evaluation_is_not_an_attempt() {
        let mut ctx = ctx();
        mark_action_complete(&mut ctx, "a", 1.0).unwrap();
        assert_eq!(evaluate(&mut ctx, "a", 0, true), ValidationOutcome::Inconclusive);
        let (_, action) = ctx.roadmap.find_action("a").unwrap();
        assert_eq!(action.attempts, 0);
        assert_eq!(action.status, ActionStatus::Completed);
    }

    #[test]
    fn validated_action_cannot_be_completed_again() {
        let mut ctx = ctx();
        mark_action_complete(&mut ctx, "a", 1.0).unwrap();
        evaluate(&mut ctx, "a", 9, false);
        assert!(matches!(
            mark_action_complete(&mut ctx, "a", 1.0),
            Err(AgentError::ActionNotReady { .. })
        ));
        assert!(matches!(
            mark_action_complete(&mut ctx, "zzz", 1.0),
            Err(AgentError::ActionNotFound { .. })
        ));
    }

    #[test]
    fn manual_score_counts_like_an_evaluation() {
        let mut ctx = ctx();
        let outcome = record_manual_score(&mut ctx, "a", 7, 2.0, Thresholds::default()).unwrap();
        assert_eq!(outcome, ValidationOutcome::Passed { score: 7 });
        let (_, action) = ctx.roadmap.find_action("a").unwrap();
        assert!(action.agent_satisfied);
        assert_eq!(action.hours_spent, 2.0);
        let evaluation = action.evaluation.as_ref().unwrap();
        assert_eq!(evaluation.total_score, 7);
        assert!(evaluation.individual_scores.is_empty());
        assert!(!evaluation.fallback);

        let outcome = record_manual_score(&mut ctx, "b", 2, 1.0, Thresholds::default()).unwrap();
        assert_eq!(
            outcome,
            ValidationOutcome::BelowThreshold { score: 2, attempts: 1, remaining: 2 }
        );
        // A failed action goes back to pending, so the step is half done.
        assert_eq!(
            evaluate_current_step(&mut ctx, Thresholds::default()),
            StepTransition::None { completion: 0.5 }
        );
    }

    #[test]
    fn manual_score_above_the_maximum_is_rejected_untouched() {
        let mut ctx = ctx();
        assert!(matches!(
            record_manual_score(&mut ctx, "a", 10, 1.0, Thresholds::default()),
            Err(AgentError::InvalidInput(_))
        ));
        let (_, action) = ctx.roadmap.find_action("a").unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert!(action.evaluation.is_none());
    }
}
