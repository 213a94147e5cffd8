//! Core services and infrastructure

pub mod error_handling;
pub mod logging;
pub mod poll;
pub mod sync;
pub mod version;
