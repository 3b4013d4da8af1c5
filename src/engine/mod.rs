//! Deterministic state machines: step progression and rerouting.
//!
//! Nothing in here calls the generation service. Stage agents produce data;
//! the engine decides what that data means for the user's path.

pub mod consistency;
pub mod progression;
pub mod reroute;

pub use consistency::{ConsistencyReport, reconcile};
pub use progression::{StepTransition, Thresholds, ValidationOutcome};
pub use reroute::{RerouteChoice, RerouteEvent, RerouteState, RevertOutcome};
