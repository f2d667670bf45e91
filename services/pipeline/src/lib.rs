//! # Priceverse Pipeline
//!
//! The supervising shell around the trade-to-price core: ordered worker
//! lifecycle, wall-clock scheduling for the OHLCV roll-up and retention,
//! component health sampling, condition-based alerting, and the
//! composition-root binary that wires everything with explicit
//! constructors, with no container and no module-level mutable state.

pub mod alerts;
pub mod health;
pub mod retention;
pub mod scheduler;
pub mod supervisor;
pub mod workers;

pub use alerts::{Alert, AlertManager, Severity};
pub use health::HealthProbe;
pub use retention::RetentionSweeper;
pub use scheduler::{Schedule, ScheduleRegistry};
pub use supervisor::{Lifecyclable, RestartTracker, Supervisor, STOP_TIMEOUT};
