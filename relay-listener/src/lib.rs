pub mod config;
pub mod handlers;
pub mod normalize;
pub mod writer;
