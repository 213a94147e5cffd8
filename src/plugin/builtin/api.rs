//! Registration and discovery of builtin extension modules
//!
//! Builtin modules register themselves with the `extension_module!` macro and
//! are found at startup through `inventory`.

use crate::plugin::traits::ExtensionModule;

pub struct BuiltinExtensionEntry {
    pub factory: fn() -> Box<dyn ExtensionModule>,
}

inventory::collect!(BuiltinExtensionEntry);

/// Register a `Default`-constructible module for discovery
#[macro_export]
macro_rules! extension_module {
    ($module_type:ty) => {
        inventory::submit!($crate::plugin::builtin::api::BuiltinExtensionEntry {
            factory: || {
                Box::new(<$module_type>::default()) as Box<dyn $crate::plugin::ExtensionModule>
            }
        });
    };
}

/// Fresh instances of every registered builtin module
pub fn discover_builtin_extensions() -> Vec<Box<dyn ExtensionModule>> {
    inventory::iter::<BuiltinExtensionEntry>()
        .map(|entry| (entry.factory)())
        .collect()
}
