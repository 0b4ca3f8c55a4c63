pub mod editor;
pub mod exec;
pub mod helm;
pub mod list;
pub mod mutation;
pub mod resource;
