//! Application module

pub mod cli;
pub mod console_host;
pub mod event_loop;
pub mod startup;
