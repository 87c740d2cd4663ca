pub mod actions;
pub mod dispatch;
pub mod runtime;

pub use actions::ActionCallback;
pub use dispatch::{FireCallback, SubscriberList};
pub use runtime::{Event, EventKind, EventStatus};
