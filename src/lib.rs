// Grid Engine Library
//
// A grid-trading admission-control and order-matching engine: per-bar
// decisions about placing and matching orders at discrete price levels,
// factor-based sizing, and a tiered risk state machine with automatic
// recovery. Exchange connectivity and dashboards are collaborators behind
// the gateway and persistence seams.

pub mod config;
pub mod core;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod persistence;
pub mod progress;
pub mod session;
pub mod types;

// Re-export the decision core
pub use crate::core::{
    generate_plan, FillOutcome, GridEngine, GridMatchingEngine, GridPlan, MatchType,
    OrderSizingPipeline, RiskLevel, RiskZoneStateMachine, SizingOutcome, StatusSnapshot,
    ThrottleManager, TradeRecord,
};

// Re-export error types
pub use error::{ConfigError, EngineError, EngineResult};

// Re-export configuration
pub use config::EngineConfig;

// Re-export collaborator seams
pub use feed::BarFeed;
pub use gateway::{ExecutionGateway, SimulatedGateway};
pub use persistence::{Database, Outbox, PersistRecord, PersistenceSink};
pub use session::{SessionRunner, SessionSummary};

// Re-export shared types
pub use types::{Bar, FillEvent, MarketRegime, MarketSlice, OrderIntent, Side};
