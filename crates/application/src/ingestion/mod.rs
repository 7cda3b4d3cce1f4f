pub mod adapter;
pub mod alerts;

pub use adapter::{CommandStatusUpdate, DeviceCleanup, IngestionAdapter};
pub use alerts::{AlertLimit, AlertPolicy};
