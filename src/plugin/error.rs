//! Extension runtime errors

use thiserror::Error;

pub type ExtensionResult<T> = Result<T, ExtensionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    #[error("extension '{name}' targets API {found}, host major version is {expected_major}")]
    Incompatible {
        name: String,
        found: u32,
        expected_major: u32,
    },

    #[error("extension '{name}' is already loaded")]
    Duplicate { name: String },

    #[error("extension '{name}' is not loaded")]
    NotFound { name: String },

    #[error("extensions are being unloaded; '{name}' was not loaded")]
    Unloading { name: String },
}
