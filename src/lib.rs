pub mod app;
pub mod config;
pub mod core;
pub mod diskops;
pub mod panel;
pub mod plugin;
pub mod session;
pub mod shutdown;
