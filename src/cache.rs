mod delayed;
mod entry;
mod key;
mod query;

pub use delayed::*;
pub use entry::*;
pub use key::*;
pub use query::*;
