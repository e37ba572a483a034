//! Notification routing and channel strategies.
//!
//! A [`NotificationRequest`] is routed to every registered [`Channel`] whose
//! kind was requested. Matching channels run concurrently; each loads the
//! task, performs its side effect, appends an audit event and marks the task.
//! The email channel only enqueues; [`EmailDelivery`] runs on the consumer side.

mod email;
mod in_app;
mod join;
mod router;
mod service;
mod types;

pub use email::{EmailChannel, EmailDelivery};
pub use in_app::InAppChannel;
pub use join::{join_branches, Branch};
pub use router::{Channel, NotificationRouter};
pub use service::{NotificationService, ACK};
pub use types::{ChannelKind, EmailIntent, NotificationRequest};
