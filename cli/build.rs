/// Ensure `assets/` exists so `include_dir!()` never panics.
///
/// The real agent sources ship with the crate; this script only creates
/// placeholder stubs when the directory is missing (sparse checkouts,
/// vendored builds).
use std::fs;
use std::path::PathBuf;

fn main() {
    let assets: PathBuf = [env!("CARGO_MANIFEST_DIR"), "assets"].iter().collect();

    if !assets.is_dir() {
        create_stubs(&assets);
    }

    println!("cargo::rerun-if-changed=assets");
}

fn create_stubs(assets: &PathBuf) {
    let modules = assets.join("modules");
    fs::create_dir_all(&modules).unwrap_or_else(|e| panic!("create {}: {e}", modules.display()));
    for (name, content) in [
        ("agent.py", "# stub: real agent source ships in cli/assets\n"),
        ("modules/noop.py", "def main(args, check_mode):\n    return {}\n"),
    ] {
        fs::write(assets.join(name), content).unwrap_or_else(|e| panic!("write {name}: {e}"));
    }
}
