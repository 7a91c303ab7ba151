//! Scheduler behavior: chunking, fail-fast, cancellation, panic isolation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ftl_cli::agent::AgentBuilder;
use ftl_cli::inventory::Host;
use ftl_cli::modules::{NativeModule, NativeRegistry};
use ftl_cli::pool::ConnectionPool;
use ftl_cli::resolver::ModuleResolver;
use ftl_cli::runner::{LocalExternalRunner, LocalNativeRunner, RemoteRunner};
use ftl_cli::scheduler::Scheduler;
use ftl_cli::summary::RunSummary;
use ftl_cli::transport::Transport;
use ftl_cli::types::{HostEvent, ModuleInvocation};

use crate::mocks::{self, Behavior, FailOn, Gauge, MockTransport, Panicker, Sleeper};

fn scheduler_over<T: Transport + 'static>(
    registry: Arc<NativeRegistry>,
    transport: T,
    cache: &tempfile::TempDir,
) -> (Scheduler<T>, mpsc::UnboundedReceiver<HostEvent>) {
    let resolver = Arc::new(ModuleResolver::new(registry, Vec::new()));
    let builder = Arc::new(AgentBuilder::with_source(
        b"fake agent source".to_vec(),
        cache.path().to_path_buf(),
    ));
    let pool = Arc::new(ConnectionPool::new(transport, builder));
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let native = Arc::new(LocalNativeRunner::new(Arc::clone(&resolver)));
    let external = Arc::new(LocalExternalRunner::new(Arc::clone(&resolver)));
    let remote = Arc::new(RemoteRunner::new(pool, Arc::clone(&resolver), events_tx));
    (
        Scheduler::new(resolver, native, external, remote),
        events_rx,
    )
}

fn registry_with(handlers: Vec<Arc<dyn NativeModule>>) -> Arc<NativeRegistry> {
    let mut registry = NativeRegistry::empty();
    for handler in handlers {
        registry.register(handler);
    }
    Arc::new(registry)
}

fn assert_summary_invariants(summary: &RunSummary, attempted: usize) {
    assert_eq!(summary.results.len(), attempted, "one entry per host");
    assert_eq!(
        summary.successful + summary.failed,
        summary.results.len() as u64
    );
    assert!(summary.changed <= summary.successful);
    assert!(summary.skipped <= summary.successful);
}

#[tokio::test]
async fn local_run_over_two_hosts_succeeds() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, _events) = scheduler_over(
        NativeRegistry::builtin(),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );

    let hosts = vec![mocks::local_host("alpha"), mocks::local_host("beta")];
    let invocation = ModuleInvocation::new("ftl_noop");
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    assert_summary_invariants(&summary, 2);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.changed, 0);
    assert!(summary.results.contains_key("alpha"));
    assert!(summary.results.contains_key("beta"));
}

#[tokio::test]
async fn fail_fast_finishes_the_chunk_and_skips_the_rest() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, _events) = scheduler_over(
        registry_with(vec![Arc::new(FailOn("h2"))]),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );
    let scheduler = scheduler.chunk_size(4).fail_fast(true);

    let hosts: Vec<Host> = (1..=6).map(|i| mocks::local_host(&format!("h{i}"))).collect();
    let invocation = ModuleInvocation::new("failon");
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    // The whole first chunk is attempted; the second chunk never starts.
    for host in ["h1", "h2", "h3", "h4"] {
        assert!(summary.results.contains_key(host), "missing {host}");
    }
    assert!(!summary.results.contains_key("h5"));
    assert!(!summary.results.contains_key("h6"));
    assert!(summary.failed >= 1);
    assert!(summary.results["h2"].failed);
    assert_summary_invariants(&summary, 4);
}

#[tokio::test]
async fn without_fail_fast_every_chunk_runs() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, _events) = scheduler_over(
        registry_with(vec![Arc::new(FailOn("h2"))]),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );
    let scheduler = scheduler.chunk_size(2);

    let hosts: Vec<Host> = (1..=6).map(|i| mocks::local_host(&format!("h{i}"))).collect();
    let invocation = ModuleInvocation::new("failon");
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    assert_summary_invariants(&summary, 6);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.successful, 5);
}

#[tokio::test]
async fn cancellation_records_every_targeted_host() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, _events) = scheduler_over(
        registry_with(vec![Arc::new(Sleeper(500))]),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );
    let scheduler = scheduler.chunk_size(10);

    let hosts: Vec<Host> = (0..50).map(|i| mocks::local_host(&format!("n{i:02}"))).collect();
    let invocation = ModuleInvocation::new("sleeper");

    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        deadline.cancel();
    });

    let started = Instant::now();
    let summary = scheduler.execute(&cancel, &hosts, &invocation).await;
    let elapsed = started.elapsed();

    assert_summary_invariants(&summary, 50);
    assert!(
        summary
            .results
            .values()
            .any(|r| r.failed && r.msg.contains("cancelled")),
        "at least one entry must carry the cancellation message"
    );
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
}

#[tokio::test]
async fn concurrency_never_exceeds_the_chunk_size() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (gauge, peak) = Gauge::new();
    let (scheduler, _events) = scheduler_over(
        registry_with(vec![Arc::new(gauge)]),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );
    let scheduler = scheduler.chunk_size(5);

    let hosts: Vec<Host> = (0..20).map(|i| mocks::local_host(&format!("g{i:02}"))).collect();
    let invocation = ModuleInvocation::new("gauge");
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    assert_summary_invariants(&summary, 20);
    assert_eq!(summary.successful, 20);
    let peak = peak.load(std::sync::atomic::Ordering::SeqCst);
    assert!(peak <= 5, "peak concurrency was {peak}");
    assert!(peak >= 2, "chunks should actually run in parallel");
}

#[tokio::test]
async fn a_panicking_task_becomes_a_failure_for_that_host_only() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, _events) = scheduler_over(
        registry_with(vec![Arc::new(Panicker)]),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );

    let hosts = vec![mocks::local_host("solo")];
    let invocation = ModuleInvocation::new("panicker");
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    assert_summary_invariants(&summary, 1);
    assert!(summary.results["solo"].failed);
}

#[tokio::test]
async fn unresolvable_module_fails_per_host_without_erroring_the_run() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, _events) = scheduler_over(
        Arc::new(NativeRegistry::empty()),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );

    let hosts = vec![mocks::local_host("alpha"), mocks::local_host("beta")];
    let invocation = ModuleInvocation::new("no.such.module");
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    assert_summary_invariants(&summary, 2);
    assert_eq!(summary.failed, 2);
    assert!(summary.results["alpha"].msg.contains("no.such.module"));
}

#[tokio::test]
async fn excluded_modules_are_refused_per_host() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, _events) = scheduler_over(
        NativeRegistry::builtin(),
        MockTransport::new(Behavior::Respond { events: 0 }),
        &cache,
    );

    let hosts = vec![mocks::local_host("alpha")];
    let invocation = ModuleInvocation::new("ansible.builtin.reboot");
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    assert_eq!(summary.failed, 1);
    assert!(summary.results["alpha"].msg.contains("excluded"));
}

#[tokio::test]
async fn remote_hosts_run_through_the_agent_channel() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let (scheduler, mut events) = scheduler_over(
        NativeRegistry::builtin(),
        MockTransport::new(Behavior::Respond { events: 2 }),
        &cache,
    );

    let hosts = vec![mocks::remote_host("web1")];
    let mut args = serde_json::Map::new();
    args.insert("data".into(), serde_json::Value::from("marco"));
    let invocation = ModuleInvocation::new("ftl_ping").with_args(args);
    let summary = scheduler
        .execute(&CancellationToken::new(), &hosts, &invocation)
        .await;

    assert_summary_invariants(&summary, 1);
    assert_eq!(summary.successful, 1, "{:?}", summary.results["web1"].msg);
    assert_eq!(summary.results["web1"].data["echo"]["data"], "marco");

    // The agent's progress events reached the run-wide sink, in order.
    let first = events.recv().await.expect("first event");
    assert_eq!(first.host, "web1");
    assert_eq!(first.message, "step 0");
    let second = events.recv().await.expect("second event");
    assert_eq!(second.message, "step 1");
}
