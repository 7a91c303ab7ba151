//! Controller facade: wires the resolver, builder, pool, runners, and
//! scheduler together behind the configure/execute/close surface the CLI
//! (or a library caller) consumes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::AgentBuilder;
use crate::assets;
use crate::config::ControllerConfig;
use crate::inventory::Inventory;
use crate::modules::NativeRegistry;
use crate::pool::ConnectionPool;
use crate::resolver::ModuleResolver;
use crate::runner::{LocalExternalRunner, LocalNativeRunner, RemoteRunner};
use crate::scheduler::Scheduler;
use crate::summary::RunSummary;
use crate::transport::{SshTransport, Transport};
use crate::types::{HostEvent, ModuleInvocation};

/// Optional overrides for [`Controller::configure`]. Struct-based so new
/// knobs never break existing callers.
#[derive(Debug, Clone, Default)]
pub struct ConfigureOptions {
    /// Hosts executed in parallel per chunk. Must be at least 1.
    pub chunk_size: Option<usize>,
    /// Stop scheduling new work after the first failure.
    pub fail_fast: Option<bool>,
    /// Check mode: report what would change without changing it.
    pub dry_run: Option<bool>,
    /// External modules bundled into the agent archive (replaces the set).
    pub module_bundle: Option<Vec<String>>,
    /// Directories searched for external collections (replaces the set).
    pub module_roots: Option<Vec<PathBuf>>,
}

pub struct Controller<T: Transport + 'static> {
    config: ControllerConfig,
    inventory: Inventory,
    resolver: Arc<ModuleResolver>,
    native: Arc<LocalNativeRunner>,
    external: Arc<LocalExternalRunner>,
    remote: Arc<RemoteRunner<T>>,
    pool: Arc<ConnectionPool<T>>,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl Controller<SshTransport> {
    /// Production controller over the ssh transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the cache directory cannot be prepared or a
    /// bundled module does not resolve.
    pub fn new(config: ControllerConfig, inventory: Inventory) -> Result<Self> {
        let transport = SshTransport::new(config.interpreter.clone());
        Self::with_transport(config, inventory, transport)
    }
}

impl<T: Transport + 'static> Controller<T> {
    /// Controller over an arbitrary transport (tests inject doubles here).
    ///
    /// # Errors
    ///
    /// Returns an error when the cache directory cannot be prepared or a
    /// bundled module does not resolve.
    pub fn with_transport(
        config: ControllerConfig,
        inventory: Inventory,
        transport: T,
    ) -> Result<Self> {
        let resolver = build_resolver(&config);
        let builder = assemble_builder(&config, &resolver)?;

        let pool =
            Arc::new(ConnectionPool::new(transport, builder).probe_on_connect(config.probe));

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<HostEvent>();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                info!(
                    target: "ftl::event",
                    host = %event.host,
                    event = %event.event,
                    "{}",
                    event.message
                );
            }
        });

        let (native, external, remote) =
            build_runners(&config, &resolver, &pool, events_tx.clone());

        Ok(Self {
            config,
            inventory,
            resolver,
            native,
            external,
            remote,
            pool,
            events: events_tx,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    /// Apply configuration overrides.
    ///
    /// Scheduling knobs (`chunk_size`, `fail_fast`, `dry_run`) take effect
    /// on the next `execute`. Changing `module_bundle` or `module_roots`
    /// rebuilds the resolver, the runners, and the archive recipe; pooled
    /// sessions stay alive and sessions opened from now on deploy the new
    /// content-addressed archive.
    ///
    /// # Errors
    ///
    /// Returns an error for a `chunk_size` of 0 or when a bundled module
    /// does not resolve.
    pub async fn configure(&mut self, opts: ConfigureOptions) -> Result<()> {
        if let Some(chunk_size) = opts.chunk_size {
            anyhow::ensure!(chunk_size >= 1, "chunk_size must be at least 1");
            self.config.chunk_size = chunk_size;
        }
        if let Some(fail_fast) = opts.fail_fast {
            self.config.fail_fast = fail_fast;
        }
        if let Some(dry_run) = opts.dry_run {
            self.config.dry_run = dry_run;
        }

        let module_surface_changed = opts.module_bundle.is_some() || opts.module_roots.is_some();
        if let Some(roots) = opts.module_roots {
            self.config.module_roots = roots;
        }
        if let Some(bundle) = opts.module_bundle {
            self.config.module_bundle = bundle;
        }
        if module_surface_changed {
            // Stage the new module surface fully before swapping anything,
            // so a bad bundle leaves the running engine untouched.
            let resolver = build_resolver(&self.config);
            let builder = assemble_builder(&self.config, &resolver)?;
            self.pool.set_builder(builder).await;
            let (native, external, remote) =
                build_runners(&self.config, &resolver, &self.pool, self.events.clone());
            self.resolver = resolver;
            self.native = native;
            self.external = external;
            self.remote = remote;
        }
        Ok(())
    }

    /// Execute `module` with `args` across the hosts selected by `targets`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the target expression does not select any
    /// known hosts; per-host failures are reported inside the summary.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        targets: &str,
        module: &str,
        args: Map<String, Value>,
    ) -> Result<RunSummary> {
        let hosts = self.inventory.select(targets)?;
        let invocation = ModuleInvocation::new(module)
            .with_args(args)
            .check_mode(self.config.dry_run);
        info!(
            module,
            targets,
            hosts = hosts.len(),
            chunk_size = self.config.chunk_size,
            fail_fast = self.config.fail_fast,
            "run starting"
        );
        let scheduler = Scheduler::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.native),
            Arc::clone(&self.external),
            Arc::clone(&self.remote),
        )
        .chunk_size(self.config.chunk_size)
        .fail_fast(self.config.fail_fast);
        Ok(scheduler.execute(cancel, &hosts, &invocation).await)
    }

    /// Drain the connection pool and release the run's resources.
    ///
    /// # Errors
    ///
    /// Returns the joined per-session close failures.
    pub async fn close(&self) -> Result<()> {
        self.pool.drain().await.map_err(anyhow::Error::from)
    }
}

fn build_resolver(config: &ControllerConfig) -> Arc<ModuleResolver> {
    Arc::new(ModuleResolver::new(
        NativeRegistry::builtin(),
        config.module_roots.clone(),
    ))
}

/// The archive recipe: embedded agent source, the native counterparts, and
/// the requested external bundle.
fn assemble_builder(
    config: &ControllerConfig,
    resolver: &ModuleResolver,
) -> Result<Arc<AgentBuilder>> {
    let cache_dir = config.cache_dir()?;
    let mut extensions =
        assets::extract_native_modules(&cache_dir).context("extracting native modules")?;
    extensions.extend(
        resolver
            .resolve_bundle(&config.module_bundle)
            .context("resolving module bundle")?,
    );
    Ok(Arc::new(
        AgentBuilder::new(cache_dir).with_extensions(extensions),
    ))
}

#[allow(clippy::type_complexity)]
fn build_runners<T: Transport + 'static>(
    config: &ControllerConfig,
    resolver: &Arc<ModuleResolver>,
    pool: &Arc<ConnectionPool<T>>,
    events: mpsc::UnboundedSender<HostEvent>,
) -> (
    Arc<LocalNativeRunner>,
    Arc<LocalExternalRunner>,
    Arc<RemoteRunner<T>>,
) {
    let native = Arc::new(LocalNativeRunner::new(Arc::clone(resolver)));
    let external = Arc::new(
        LocalExternalRunner::new(Arc::clone(resolver))
            .with_interpreter(config.interpreter.clone()),
    );
    let remote = Arc::new(RemoteRunner::new(
        Arc::clone(pool),
        Arc::clone(resolver),
        events,
    ));
    (native, external, remote)
}
