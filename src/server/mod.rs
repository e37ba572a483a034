//! Ops HTTP surface: health, metrics, audit events and a local delivery hook.

mod app;
mod handlers;
mod state;

pub use app::{create_app, serve};
pub use handlers::{EventsQuery, EventsResponse, HealthResponse};
pub use state::AppState;
