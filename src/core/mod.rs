// Decision core: per-bar admission control, sizing and matching

pub mod engine;
pub mod factors;
pub mod inventory;
pub mod levels;
pub mod matching;
pub mod risk_zone;
pub mod throttle;
pub mod weights;

// Re-export the types collaborators touch most.
pub use engine::{FillOutcome, GridEngine, StatusSnapshot};
pub use factors::{OrderSizingPipeline, SizingContext, SizingOutcome};
pub use inventory::InventoryTracker;
pub use levels::{generate_plan, GridPlan};
pub use matching::{GridMatchingEngine, MatchOutcome, MatchType, OpenPosition, TradeRecord};
pub use risk_zone::{RiskLevel, RiskZoneState, RiskZoneStateMachine};
pub use throttle::{ThrottleDecision, ThrottleManager, ThrottleReason};
