mod entity;
mod envelope;
mod request;
mod status;

pub use entity::{retry_backoff, Command, CommandDefaults, FailureKind, RetryDecision};
pub use envelope::{CommandEnvelope, CommandPayload};
pub use request::{CommandOrigin, CommandRequest, SYSTEM_PRINCIPAL};
pub use status::CommandStatus;
