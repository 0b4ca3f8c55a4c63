mod poller;
mod worker;

pub use poller::*;
pub use worker::*;
