//! Extension modules
//!
//! Modules are loaded into a [`PluginHost`], which the shutdown coordinator
//! unloads through the [`PluginRuntime`] trait. Each module saves its
//! configuration into the store before it goes away.

pub mod builtin;
pub mod error;
pub mod runtime;
pub mod traits;

pub use error::{ExtensionError, ExtensionResult};
pub use runtime::PluginHost;
pub use traits::{
    major_version, ExtensionInfo, ExtensionModule, ExtensionSettingsSink, PluginRuntime,
    UnloadPrompt,
};
