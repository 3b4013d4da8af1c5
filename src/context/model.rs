//! The per-user context record and its sub-records.
//!
//! `UserContext` is the only unit of persistence. Every stage reads the whole
//! record, mutates the sub-records it owns, and the whole record is written back.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::reroute::RerouteState;

/// Maximum number of entries kept in the metadata event log.
pub const EVENT_LOG_LIMIT: usize = 100;

/// Everything the system knows about one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    /// Incremented on every successful save; used for compare-and-swap.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub goal: Goal,
    #[serde(default)]
    pub readiness: Readiness,
    #[serde(default)]
    pub market: Market,
    #[serde(default)]
    pub active_path: ActivePath,
    #[serde(default)]
    pub roadmap: Roadmap,
    #[serde(default)]
    pub reroute_state: RerouteState,
    #[serde(default)]
    pub reroute_history: RerouteHistory,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub feedback: Option<ProgressFeedback>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl UserContext {
    /// A fresh context with neutral defaults.
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            version: 0,
            created_at: now,
            updated_at: now,
            profile: Profile::default(),
            goal: Goal::default(),
            readiness: Readiness::default(),
            market: Market::default(),
            active_path: ActivePath::default(),
            roadmap: Roadmap::default(),
            reroute_state: RerouteState::default(),
            reroute_history: RerouteHistory::default(),
            progress: Progress::default(),
            feedback: None,
            metadata: Metadata::default(),
        }
    }

    /// Mark user-visible activity.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.progress.last_activity = Some(now);
    }
}

// ── Profile ─────────────────────────────────────────────────────────

/// Raw background supplied during onboarding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileInputs {
    pub education: Option<String>,
    pub experience: Option<String>,
    pub skills: Vec<String>,
    pub projects: Vec<String>,
    pub interests: Vec<String>,
}

/// Inferred student profile. Written only by the profiling stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub inputs: ProfileInputs,
    pub experience_level: Option<String>,
    /// Category → skills (e.g. "programming" → ["python"]).
    pub technical_skills: BTreeMap<String, Vec<String>>,
    pub soft_skills: Vec<String>,
    pub strength_areas: Vec<String>,
    pub weakness_areas: Vec<String>,
    pub learning_capacity: Option<String>,
    pub risk_factors: Vec<String>,
    pub confidence: f64,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn is_analyzed(&self) -> bool {
        self.analyzed_at.is_some()
    }

    /// Declared and inferred technical skills, deduplicated case-insensitively.
    pub fn all_skills(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = self
            .inputs
            .skills
            .iter()
            .chain(self.technical_skills.values().flatten());
        for skill in candidates {
            if !contains_ignore_case(&out, skill) {
                out.push(skill.clone());
            }
        }
        out
    }
}

// ── Goal ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Goal {
    pub current: Option<String>,
    pub duration_weeks: Option<u32>,
    pub interpreted: Option<InterpretedGoal>,
    /// Prior goals, oldest first. Append-only.
    pub history: Vec<GoalChange>,
}

impl Goal {
    /// Set the raw goal, archiving the previous one if it differs.
    ///
    /// Returns `true` when the goal actually changed.
    pub fn set_current(&mut self, goal: &str) -> bool {
        let goal = goal.trim();
        if self.current.as_deref() == Some(goal) {
            return false;
        }
        if let Some(previous) = self.current.take() {
            self.history.push(GoalChange {
                goal: previous,
                replaced_at: Utc::now(),
            });
        }
        self.current = Some(goal.to_string());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalChange {
    pub goal: String,
    pub replaced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretedGoal {
    pub role_title: String,
    pub role_category: String,
    pub role_description: String,
    pub required_skills: Vec<String>,
    pub responsibilities: Vec<String>,
    pub clarity_score: f64,
    pub commitment_level: String,
    pub time_to_competency_months: Option<u32>,
    pub notes: Option<String>,
    pub interpreted_at: DateTime<Utc>,
}

// ── Readiness ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationRisk {
    Low,
    Medium,
    High,
}

impl DeviationRisk {
    /// Lenient parse of generated text; unknown values map to `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for DeviationRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessVerdict {
    Ready,
    NeedsPreparation,
    NotReady,
}

impl ReadinessVerdict {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "ready" => Self::Ready,
            "not_ready" => Self::NotReady,
            _ => Self::NeedsPreparation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticQuestion {
    pub question: String,
    pub category: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Readiness {
    pub confidence_score: Option<f64>,
    pub deviation_risk: Option<DeviationRisk>,
    pub questions: Vec<DiagnosticQuestion>,
    pub answers: Vec<String>,
    pub verdict: Option<ReadinessVerdict>,
    pub key_gaps: Vec<String>,
    pub preparation_weeks: Option<u32>,
    pub notes: Option<String>,
    pub assessed_at: Option<DateTime<Utc>>,
}

// ── Market ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketTrend {
    Growing,
    Stable,
    Declining,
}

impl MarketTrend {
    pub fn parse_lenient(s: &str) -> Self {
        let s = s.to_ascii_lowercase();
        if s.contains("grow") || s.contains("rising") || s.contains("increas") {
            Self::Growing
        } else if s.contains("declin") || s.contains("shrink") || s.contains("decreas") {
            Self::Declining
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjacentRole {
    pub role: String,
    pub reason: String,
    pub demand_score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub role_title: String,
    /// 0–100.
    pub demand_score: u8,
    pub competition_level: String,
    pub entry_barrier: String,
    pub trend: MarketTrend,
    pub in_demand_skills: Vec<String>,
    pub adjacent_roles: Vec<AdjacentRole>,
    pub notes: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub role: String,
    pub demand_score: u8,
    pub trend: MarketTrend,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Market {
    pub snapshot: Option<MarketSnapshot>,
    /// Append-only.
    pub trend_history: Vec<TrendPoint>,
}

// ── Active path ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    #[default]
    NotStarted,
    InProgress,
    Failed,
    Resumed,
    Completed,
}

impl std::fmt::Display for PathStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Failed => "failed",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    #[default]
    Original,
    Alternative,
    AdjustedOriginal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub step_number: u32,
    pub title: String,
    pub description: String,
    pub skills: Vec<String>,
    pub duration_weeks: u32,
    pub success_criteria: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackPath {
    pub role: String,
    pub reason: String,
    pub success_probability: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathChangeKind {
    Replanned,
    Alternative,
    AdjustedOriginal,
    Reversion,
}

impl std::fmt::Display for PathChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Replanned => "replanned",
            Self::Alternative => "alternative",
            Self::AdjustedOriginal => "adjusted_original",
            Self::Reversion => "reversion",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathChange {
    pub kind: PathChangeKind,
    pub from_role: Option<String>,
    pub to_role: String,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivePath {
    pub path_id: Option<String>,
    pub target_role: Option<String>,
    pub steps: Vec<PathStep>,
    pub fallback_paths: Vec<FallbackPath>,
    pub success_probability: f64,
    pub estimated_duration_months: Option<f64>,
    pub status: PathStatus,
    pub path_type: PathType,
    pub risk_factors: Vec<String>,
    pub modification_notes: Vec<String>,
    original_target_role: Option<String>,
    /// Every pivot, oldest first. Append-only.
    pub change_history: Vec<PathChange>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ActivePath {
    pub fn is_planned(&self) -> bool {
        self.target_role.is_some()
    }

    pub fn original_target_role(&self) -> Option<&str> {
        self.original_target_role.as_deref()
    }

    /// Record the first role ever planned. Later calls are no-ops.
    pub fn pin_original_target_role(&mut self, role: &str) -> bool {
        if self.original_target_role.is_some() {
            return false;
        }
        self.original_target_role = Some(role.to_string());
        true
    }

    /// Replace the target role, logging the pivot.
    pub fn switch_role(&mut self, kind: PathChangeKind, to_role: &str, reason: &str) {
        let from_role = self.target_role.clone();
        if let Some(from) = from_role.as_deref() {
            self.pin_original_target_role(from);
        }
        self.change_history.push(PathChange {
            kind,
            from_role,
            to_role: to_role.to_string(),
            reason: reason.to_string(),
            changed_at: Utc::now(),
        });
        self.target_role = Some(to_role.to_string());
    }

    /// Skills across all primary steps.
    pub fn step_skills(&self) -> impl Iterator<Item = &String> {
        self.steps.iter().flat_map(|s| s.skills.iter())
    }
}

// ── Roadmap ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadmapStatus {
    #[default]
    NotGenerated,
    InProgress,
    Completed,
}

/// Scored answers for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvaluation {
    /// Raw score, 0–9.
    pub total_score: u8,
    pub individual_scores: Vec<u8>,
    pub feedback: String,
    pub recommendation: String,
    /// Substituted because the generated evaluation could not be parsed.
    pub fallback: bool,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    pub title: String,
    pub description: String,
    pub action_type: String,
    pub estimated_hours: f64,
    pub priority: String,
    pub success_criteria: String,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub evaluation: Option<ActionEvaluation>,
    /// `total_score / 9`.
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub agent_satisfied: bool,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub hours_spent: f64,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(action_id: &str, title: &str, description: &str) -> Self {
        Self {
            action_id: action_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            action_type: "practice".to_string(),
            estimated_hours: 4.0,
            priority: "medium".to_string(),
            success_criteria: String::new(),
            status: ActionStatus::Pending,
            questions: Vec::new(),
            answers: Vec::new(),
            evaluation: None,
            relevance_score: 0.0,
            agent_satisfied: false,
            attempts: 0,
            hours_spent: 0.0,
            completed_at: None,
        }
    }

    /// Has a stored evaluation at or above `pass_score`.
    pub fn is_validated(&self, pass_score: u8) -> bool {
        self.evaluation
            .as_ref()
            .is_some_and(|e| !e.fallback && e.total_score >= pass_score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_number: u32,
    pub title: String,
    pub description: String,
    pub skills: Vec<String>,
    pub duration_weeks: u32,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub completion_percentage: f64,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    /// `completed / total` by action status; 0 for a step with no actions.
    pub fn completion_ratio(&self) -> f64 {
        if self.actions.is_empty() {
            return 0.0;
        }
        let done = self
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Completed)
            .count();
        done as f64 / self.actions.len() as f64
    }

    pub fn all_validated(&self, pass_score: u8) -> bool {
        !self.actions.is_empty() && self.actions.iter().all(|a| a.is_validated(pass_score))
    }

    pub fn has_open_action(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.status != ActionStatus::Completed || !a.agent_satisfied)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Roadmap {
    pub roadmap_id: Option<String>,
    pub target_role: Option<String>,
    pub steps: Vec<Step>,
    pub current_step_number: Option<u32>,
    pub completed_steps: Vec<u32>,
    pub status: RoadmapStatus,
    pub generated_at: Option<DateTime<Utc>>,
}

impl Roadmap {
    pub fn is_generated(&self) -> bool {
        self.status != RoadmapStatus::NotGenerated && !self.steps.is_empty()
    }

    pub fn step(&self, number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == number)
    }

    pub fn step_mut(&mut self, number: u32) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.step_number == number)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.current_step_number.and_then(|n| self.step(n))
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        let n = self.current_step_number?;
        self.step_mut(n)
    }

    /// The step following `number` in roadmap order.
    pub fn next_step_after(&self, number: u32) -> Option<u32> {
        self.steps
            .iter()
            .map(|s| s.step_number)
            .filter(|n| *n > number)
            .min()
    }

    pub fn find_action(&self, action_id: &str) -> Option<(u32, &Action)> {
        self.steps.iter().find_map(|s| {
            s.actions
                .iter()
                .find(|a| a.action_id == action_id)
                .map(|a| (s.step_number, a))
        })
    }

    pub fn find_action_mut(&mut self, action_id: &str) -> Option<(u32, &mut Action)> {
        self.steps.iter_mut().find_map(|s| {
            let number = s.step_number;
            s.actions
                .iter_mut()
                .find(|a| a.action_id == action_id)
                .map(|a| (number, a))
        })
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.steps.iter().flat_map(|s| s.actions.iter())
    }

    pub fn satisfied_actions(&self) -> usize {
        self.actions().filter(|a| a.agent_satisfied).count()
    }
}

// ── Reroute history ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPath {
    pub role: String,
    pub reason: String,
    pub completion_rate: f64,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub kind: PathChangeKind,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// An action retired from a replaced roadmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedAction {
    pub role: Option<String>,
    pub step_number: u32,
    pub action: Action,
    pub archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RerouteHistory {
    pub failed_paths: Vec<FailedPath>,
    pub reasons: Vec<String>,
    pub applied_changes: Vec<AppliedChange>,
    pub archived_actions: Vec<ArchivedAction>,
    /// Goal interpretation of the original role, taken before the first switch away from it.
    pub original_goal: Option<InterpretedGoal>,
    reroute_count: u32,
}

impl RerouteHistory {
    pub fn reroute_count(&self) -> u32 {
        self.reroute_count
    }

    /// Log an applied change. The reroute counter moves by exactly one.
    pub fn record_applied(&mut self, kind: PathChangeKind, description: &str) -> u32 {
        self.applied_changes.push(AppliedChange {
            kind,
            description: description.to_string(),
            applied_at: Utc::now(),
        });
        self.reroute_count += 1;
        self.reroute_count
    }

    /// Move every satisfied action of `roadmap` into the archive.
    pub fn archive_completed(&mut self, roadmap: &Roadmap) -> usize {
        let now = Utc::now();
        let before = self.archived_actions.len();
        for step in &roadmap.steps {
            for action in step.actions.iter().filter(|a| a.agent_satisfied) {
                self.archived_actions.push(ArchivedAction {
                    role: roadmap.target_role.clone(),
                    step_number: step.step_number,
                    action: action.clone(),
                    archived_at: now,
                });
            }
        }
        self.archived_actions.len() - before
    }
}

// ── Progress ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub description: String,
    pub action_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from_stage: u32,
    pub to_stage: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub time_spent_hours: f64,
    /// Satisfied actions over materialised actions of the current roadmap.
    pub completion_rate: f64,
    active_stage: u32,
    pub stage_completion_rate: f64,
    /// Append-only.
    pub blockers: Vec<Blocker>,
    pub last_activity: Option<DateTime<Utc>>,
    pub stage_transitions: Vec<StageTransition>,
}

impl Progress {
    pub fn active_stage(&self) -> u32 {
        self.active_stage
    }

    /// Move to the next stage. Always exactly one forward.
    pub fn advance_stage(&mut self) -> u32 {
        self.raise_stage_to(self.active_stage + 1)
    }

    /// Move up to `stage` if behind it. The active stage never goes down.
    pub fn raise_stage_to(&mut self, stage: u32) -> u32 {
        if stage > self.active_stage {
            self.stage_transitions.push(StageTransition {
                from_stage: self.active_stage,
                to_stage: stage,
                at: Utc::now(),
            });
            self.active_stage = stage;
        }
        self.active_stage
    }

    /// Zero the per-path counters when a different path takes over.
    pub fn reset_for_new_path(&mut self) {
        self.completion_rate = 0.0;
        self.stage_completion_rate = 0.0;
    }

    pub fn record_blocker(&mut self, description: &str, action_id: Option<&str>) {
        self.blockers.push(Blocker {
            description: description.to_string(),
            action_id: action_id.map(str::to_string),
            recorded_at: Utc::now(),
        });
    }
}

// ── Feedback ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressFeedback {
    pub overall_rating: String,
    pub velocity: String,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub recommendations: Vec<String>,
    pub encouragement: String,
    pub confidence_score: f64,
    pub deviation_risk: DeviationRisk,
    pub generated_at: DateTime<Utc>,
}

// ── Metadata ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub kind: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub agent_interactions: BTreeMap<String, u64>,
    pub token_usage: BTreeMap<String, TokenUsage>,
    pub fallbacks: u64,
    events: VecDeque<SystemEvent>,
}

impl Metadata {
    pub fn events(&self) -> impl Iterator<Item = &SystemEvent> {
        self.events.iter()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Append an event, dropping the oldest beyond [`EVENT_LOG_LIMIT`].
    pub fn record_event(&mut self, kind: &str, detail: impl Into<String>) {
        self.events.push_back(SystemEvent {
            kind: kind.to_string(),
            detail: detail.into(),
            at: Utc::now(),
        });
        while self.events.len() > EVENT_LOG_LIMIT {
            self.events.pop_front();
        }
    }

    pub fn record_interaction(&mut self, agent: &str) -> u64 {
        let count = self.agent_interactions.entry(agent.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_usage(&mut self, agent: &str, input: u32, output: u32, cost: Decimal) {
        let usage = self.token_usage.entry(agent.to_string()).or_default();
        usage.calls += 1;
        usage.input_tokens += u64::from(input);
        usage.output_tokens += u64::from(output);
        usage.cost_usd += cost;
    }
}

/// Case-insensitive membership test.
pub fn contains_ignore_case(haystack: &[String], needle: &str) -> bool {
    let needle = needle.trim();
    haystack.iter().any(|s| s.trim().eq_ignore_ascii_case(needle))
}
