mod entity;
mod kind;

pub use entity::{Notification, NotificationDraft, NotificationStatus};
pub use kind::{NotificationLevel, NotificationType};
