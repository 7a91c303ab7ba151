//! Uniform contract for executing one module on one host.

pub mod local;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::inventory::Host;
use crate::types::{ModuleInvocation, ModuleResult};

pub use local::{LocalExternalRunner, LocalNativeRunner};
pub use remote::RemoteRunner;

/// One module on one host. Implementations convert their own lower-level
/// failures into errors; the scheduler flattens errors into failure results
/// so no host ever goes missing from the summary.
#[async_trait]
pub trait ModuleRunner: Send + Sync {
    /// Execute the invocation, honoring `cancel` at every suspension point.
    ///
    /// # Errors
    ///
    /// Returns an error when the module cannot be executed at all; a module
    /// that ran and reported failure comes back as `Ok` with `failed: true`.
    async fn run(
        &self,
        cancel: &CancellationToken,
        host: &Host,
        invocation: &ModuleInvocation,
    ) -> Result<ModuleResult>;

    /// Release whatever the runner holds.
    ///
    /// # Errors
    ///
    /// Returns an error if resources cannot be released cleanly.
    async fn close(&self) -> Result<()>;
}
