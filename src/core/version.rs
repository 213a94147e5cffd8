//! Build metadata generated by the build script.

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Extension API version the host was built with (`YYYYMMDD`)
pub fn extension_api_version() -> u32 {
    EXTENSION_API_VERSION
}

/// Build time string from the build script (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash captured by the build script
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// One-line version banner for `--version` style output
pub fn banner() -> String {
    format!(
        "{} {} ({} built {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        git_hash(),
        build_time()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_api_version_is_dated() {
        // YYYYMMDD
        assert!(extension_api_version() > 2020_00_00);
    }

    #[test]
    fn test_banner_contains_package_name() {
        assert!(banner().starts_with("endsession "));
    }
}
