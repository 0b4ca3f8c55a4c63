mod cluster;
pub mod endpoint;
mod fetch;

pub use cluster::*;
pub use fetch::*;
