//! Controller facade behavior: configure/execute/close.

use tokio_util::sync::CancellationToken;

use ftl_cli::config::ControllerConfig;
use ftl_cli::controller::{ConfigureOptions, Controller};
use ftl_cli::inventory::Inventory;
use ftl_cli::resolver::ModuleKind;

use crate::mocks::{self, Behavior, MockTransport};

fn config_in(cache: &tempfile::TempDir) -> ControllerConfig {
    ControllerConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        ..ControllerConfig::default()
    }
}

fn local_inventory() -> Inventory {
    Inventory::from_hosts(vec![mocks::local_host("alpha"), mocks::local_host("beta")])
}

fn controller_in(cache: &tempfile::TempDir) -> Controller<MockTransport> {
    Controller::with_transport(
        config_in(cache),
        local_inventory(),
        MockTransport::new(Behavior::Respond { events: 0 }),
    )
    .expect("controller")
}

#[tokio::test]
async fn configure_rejects_zero_chunk_size() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let mut controller = controller_in(&cache);
    let err = controller
        .configure(ConfigureOptions {
            chunk_size: Some(0),
            ..ConfigureOptions::default()
        })
        .await
        .expect_err("must reject");
    assert!(err.to_string().contains("chunk_size"));
}

#[tokio::test]
async fn configure_applies_scheduling_knobs() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let mut controller = controller_in(&cache);
    controller
        .configure(ConfigureOptions {
            chunk_size: Some(3),
            fail_fast: Some(true),
            dry_run: Some(true),
            ..ConfigureOptions::default()
        })
        .await
        .expect("configure");
    assert_eq!(controller.config().chunk_size, 3);
    assert!(controller.config().fail_fast);
    assert!(controller.config().dry_run);
}

#[tokio::test]
async fn configure_module_roots_extends_the_search_path() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let root = tempfile::TempDir::new().expect("tempdir");
    let modules = root.path().join("collections/acme/tools/modules");
    std::fs::create_dir_all(&modules).expect("mkdir");
    std::fs::write(modules.join("deploy.py"), "def main(a, c):\n    return {}\n")
        .expect("write");

    let mut controller = controller_in(&cache);
    assert!(
        controller.resolver().resolve("acme.tools.deploy").is_err(),
        "not resolvable before configure"
    );

    controller
        .configure(ConfigureOptions {
            module_roots: Some(vec![root.path().to_path_buf()]),
            ..ConfigureOptions::default()
        })
        .await
        .expect("configure");

    let kind = controller
        .resolver()
        .resolve("acme.tools.deploy")
        .expect("resolvable after configure");
    assert!(matches!(kind, ModuleKind::External { .. }));
}

#[tokio::test]
async fn configure_rejects_an_unresolvable_bundle() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let mut controller = controller_in(&cache);
    let err = controller
        .configure(ConfigureOptions {
            module_bundle: Some(vec!["acme.tools.ghost".into()]),
            ..ConfigureOptions::default()
        })
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("module bundle"));
}

#[tokio::test]
async fn execute_runs_with_the_configured_knobs() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let mut controller = controller_in(&cache);
    controller
        .configure(ConfigureOptions {
            chunk_size: Some(1),
            dry_run: Some(true),
            ..ConfigureOptions::default()
        })
        .await
        .expect("configure");

    let summary = controller
        .execute(&CancellationToken::new(), "all", "ftl_noop", serde_json::Map::new())
        .await
        .expect("execute");
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 0);

    controller.close().await.expect("close");
}
