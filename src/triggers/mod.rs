//! Function-trigger hosting mode.
//!
//! The runtime API hands out one event per invocation. [`FunctionTrigger`]
//! routes it to the same [`NotificationService`](crate::notification::NotificationService)
//! the gRPC listener uses; [`FunctionHost`] drives the fetch and report loop.

mod function;
mod runtime;

pub use function::{DirectRequest, FunctionHost, FunctionTrigger, InboundEvent, QueueBatch, QueueRecord};
pub use runtime::{Invocation, RuntimeApiClient, RuntimeError};
