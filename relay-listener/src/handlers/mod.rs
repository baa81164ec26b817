mod app;
mod webhook;

pub use app::add_routes;
pub use webhook::{ListenerState, WebhookPostResponse};
