//! Stamps build metadata into `$OUT_DIR/version.rs` for `core::version`

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Used when `[package.metadata] extension_api_version` is missing or malformed
const DEFAULT_EXTENSION_API: i64 = 20261018;

fn extension_api_version(manifest: &Path) -> i64 {
    let Ok(contents) = std::fs::read_to_string(manifest) else {
        return DEFAULT_EXTENSION_API;
    };
    let Ok(table) = contents.parse::<toml::Table>() else {
        println!("cargo:warning=Cargo.toml did not parse; using the default extension API");
        return DEFAULT_EXTENSION_API;
    };
    table
        .get("package")
        .and_then(|package| package.get("metadata"))
        .and_then(|metadata| metadata.get("extension_api_version"))
        .and_then(|version| version.as_integer())
        .unwrap_or(DEFAULT_EXTENSION_API)
}

/// Short commit hash, with `-dirty` when the work tree has local edits
fn git_revision() -> String {
    let run = |args: &[&str]| {
        Command::new("git")
            .args(args)
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| String::from_utf8(output.stdout).ok())
    };
    match run(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) => {
            let dirty = run(&["status", "--porcelain"]).is_some_and(|s| !s.trim().is_empty());
            format!("{}{}", hash.trim(), if dirty { "-dirty" } else { "" })
        }
        None => "unknown".to_string(),
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").unwrap_or_default());
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap_or_default());

    let generated = format!(
        "pub const EXTENSION_API_VERSION: u32 = {};\n\
         pub const BUILD_TIME: &str = {:?};\n\
         pub const GIT_HASH: &str = {:?};\n",
        extension_api_version(&manifest_dir.join("Cargo.toml")),
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        git_revision(),
    );
    if let Err(e) = std::fs::write(out_dir.join("version.rs"), generated) {
        panic!("cannot write version.rs: {}", e);
    }

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
