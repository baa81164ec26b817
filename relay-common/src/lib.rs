pub mod change;
pub mod config;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod pgstore;
pub mod record;
pub mod store;
