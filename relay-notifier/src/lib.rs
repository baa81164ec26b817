pub mod classify;
pub mod config;
pub mod error;
pub mod handler;
pub mod notify;
pub mod worker;
pub mod writeback;
