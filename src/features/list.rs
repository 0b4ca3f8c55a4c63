pub mod filter;
pub mod quantity;
pub mod sort;
pub mod table;
mod view;

pub use view::*;
