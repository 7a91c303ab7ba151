//! Chunked, bounded-concurrency fan-out across hosts.
//!
//! The host list is partitioned into contiguous chunks; chunks run
//! sequentially and the hosts of one chunk run in parallel, so at most
//! `chunk_size` runner invocations are active at any instant. Each chunk
//! gets a cancellation token derived from the run's, which is how both
//! fail-fast and external cancellation reach in-flight work: tasks that
//! have not started yet observe the token and record a synthetic
//! "cancelled" failure; tasks already past the check run to completion and
//! are recorded normally.
//!
//! A panicking task is converted into a failure result for its host alone.
//! Every targeted host ends with exactly one summary entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::inventory::Host;
use crate::resolver::{ModuleKind, ModuleResolver};
use crate::runner::{LocalExternalRunner, LocalNativeRunner, ModuleRunner, RemoteRunner};
use crate::summary::{Aggregator, RunSummary};
use crate::transport::Transport;
use crate::types::{ModuleInvocation, ModuleResult};

pub const DEFAULT_CHUNK_SIZE: usize = 10;

pub struct Scheduler<T: Transport> {
    chunk_size: usize,
    fail_fast: bool,
    resolver: Arc<ModuleResolver>,
    native: Arc<LocalNativeRunner>,
    external: Arc<LocalExternalRunner>,
    remote: Arc<RemoteRunner<T>>,
}

impl<T: Transport + 'static> Scheduler<T> {
    pub fn new(
        resolver: Arc<ModuleResolver>,
        native: Arc<LocalNativeRunner>,
        external: Arc<LocalExternalRunner>,
        remote: Arc<RemoteRunner<T>>,
    ) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fail_fast: false,
            resolver,
            native,
            external,
            remote,
        }
    }

    /// Set the per-chunk parallelism bound. Values below 1 are clamped.
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// On the first failure, cancel the current chunk and skip the rest.
    #[must_use]
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Execute `invocation` across `hosts` and fold the results.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        hosts: &[Host],
        invocation: &ModuleInvocation,
    ) -> RunSummary {
        let started = Instant::now();
        let aggregator = Arc::new(Aggregator::new(Utc::now()));
        let invocation = Arc::new(invocation.clone());

        for chunk in hosts.chunks(self.chunk_size) {
            let chunk_token = cancel.child_token();
            let mut tasks: JoinSet<()> = JoinSet::new();
            let mut task_hosts: HashMap<tokio::task::Id, String> = HashMap::new();
            let failed_before = aggregator.failed();

            for host in chunk {
                let handle = tasks.spawn(self.host_task(
                    host.clone(),
                    Arc::clone(&invocation),
                    Arc::clone(&aggregator),
                    chunk_token.clone(),
                ));
                task_hosts.insert(handle.id(), host.name.clone());
            }

            while let Some(joined) = tasks.join_next_with_id().await {
                match joined {
                    Ok(_) => {}
                    Err(join_err) => {
                        // A panicked task never recorded its host; do it
                        // here so the summary stays complete.
                        let host = task_hosts
                            .get(&join_err.id())
                            .cloned()
                            .unwrap_or_default();
                        warn!(%host, "runner task aborted: {join_err}");
                        aggregator.record(
                            &host,
                            ModuleResult::failure(format!("runner task aborted: {join_err}")),
                        );
                        if self.fail_fast {
                            chunk_token.cancel();
                        }
                    }
                }
            }

            if self.fail_fast && aggregator.failed() > failed_before {
                debug!("fail-fast: skipping remaining chunks");
                break;
            }
        }

        aggregator_into_summary(aggregator, started)
    }

    /// The per-host task body: check the chunk token, pick a runner, run,
    /// stamp timing, record.
    fn host_task(
        &self,
        host: Host,
        invocation: Arc<ModuleInvocation>,
        aggregator: Arc<Aggregator>,
        chunk_token: CancellationToken,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let resolver = Arc::clone(&self.resolver);
        let native = Arc::clone(&self.native);
        let external = Arc::clone(&self.external);
        let remote = Arc::clone(&self.remote);
        let fail_fast = self.fail_fast;

        async move {
            if chunk_token.is_cancelled() {
                aggregator.record(&host.name, ModuleResult::cancelled());
                return;
            }

            let started_at = Utc::now();
            let clock = Instant::now();

            let outcome = match resolver.resolve(&invocation.name) {
                Err(e) => Ok(ModuleResult::failure(e.to_string())),
                Ok(ModuleKind::Excluded { reason }) => Ok(ModuleResult::failure(format!(
                    "module '{}' is excluded: {reason}",
                    invocation.name
                ))),
                Ok(kind) if host.is_local() => {
                    if kind.is_native() {
                        native.run(&chunk_token, &host, &invocation).await
                    } else {
                        external.run(&chunk_token, &host, &invocation).await
                    }
                }
                Ok(_) => remote.run(&chunk_token, &host, &invocation).await,
            };

            let mut result = outcome.unwrap_or_else(|e| ModuleResult::failure(format!("{e:#}")));
            result.started_at = started_at;
            result.duration = clock.elapsed();

            let failed = result.failed;
            aggregator.record(&host.name, result);
            if failed && fail_fast {
                chunk_token.cancel();
            }
        }
    }
}

fn aggregator_into_summary(aggregator: Arc<Aggregator>, started: Instant) -> RunSummary {
    // All chunk tasks have been joined, so this is the only reference.
    match Arc::try_unwrap(aggregator) {
        Ok(agg) => agg.finish(started.elapsed()),
        Err(_) => unreachable!("aggregator still shared after all tasks joined"),
    }
}
