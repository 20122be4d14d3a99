pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod session;
pub mod sink;
pub mod streaming;
pub mod utils;
