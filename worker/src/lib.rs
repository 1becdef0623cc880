pub mod context;
pub mod events;
pub mod jobs;
pub mod portfolio;
pub mod runner;

pub use context::{LoopSettings, WorkerContext};
pub use events::{EventSink, RedisEventPublisher};
pub use runner::{run_bot_loop, request_stop, LoopError, LoopOutcome, StopOutcome};
