// src/scheduler/mod.rs - Timing: clock sync, time source, adaptive tick scheduling
pub mod adaptive;
pub mod clock_sync;
pub mod time_interface;

pub use adaptive::{ScheduleDecision, SchedulerStats, TickScheduler};
pub use clock_sync::{ClockSync, SyncOutcome};
pub use time_interface::{ManualTime, TimeInterface, TokioTimeSync};
