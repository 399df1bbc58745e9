pub mod mode;
pub mod pipeline;
pub mod pool;
pub mod shutdown;

pub use mode::RunMode;
pub use pipeline::{PipelineWorker, PollOutcome};
pub use pool::WorkerPool;
pub use shutdown::ShutdownSignal;
