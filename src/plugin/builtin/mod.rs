//! Extension modules that ship with the application

pub mod api;
pub mod history;

pub use history::DirectoryHistory;
