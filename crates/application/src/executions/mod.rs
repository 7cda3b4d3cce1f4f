pub mod recorder;

pub use recorder::ExecutionRecorder;
