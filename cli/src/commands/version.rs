//! Version command.

use anyhow::Result;

/// Entry point for `ftl version`.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn run(json: bool) -> Result<i32> {
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!(
            "{}",
            serde_json::json!({ "name": name, "version": version })
        );
    } else {
        println!("{name} {version}");
    }
    Ok(0)
}
