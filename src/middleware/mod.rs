pub mod stage;

pub use stage::{LoggingMiddleware, StageContext, StageMiddleware, TimingMiddleware, run_stage};
