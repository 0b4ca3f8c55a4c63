mod quota;
pub mod template;
mod yaml;

pub use quota::*;
pub use yaml::*;
