pub mod api;
pub mod app;
pub mod cache;
pub mod cmd;
pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod util;
pub mod workers;
