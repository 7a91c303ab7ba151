//! Module name classification.
//!
//! Resolution order, first match wins: native registry, `ftl_`-prefixed
//! native, then the name is parsed as a fully-qualified `ns.coll.mod` and
//! checked against the excluded set, the shadow map, and finally the
//! configured module roots on disk. The excluded set is closed and
//! terminal: there is no fallback past it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::ResolveError;
use crate::modules::{NativeModule, NativeRegistry};

/// Reserved short-form marker for native modules.
pub const NATIVE_PREFIX: &str = "ftl_";

/// Namespace and collection a bare external name expands into.
pub const BUILTIN_NAMESPACE: &str = "ansible";
pub const BUILTIN_COLLECTION: &str = "builtin";

/// File extension of external module code.
pub const MODULE_EXTENSION: &str = "py";

/// What a module name turned out to be.
#[derive(Clone)]
pub enum ModuleKind {
    /// Handler callable in-process.
    Native { handle: Arc<dyn NativeModule> },
    /// External name silently redirected to a native handler with
    /// equivalent intent.
    NativeShadowing {
        external_name: String,
        handle: Arc<dyn NativeModule>,
    },
    /// Code file to be shipped to the agent.
    External { path: PathBuf },
    /// Refusal to execute.
    Excluded { reason: &'static str },
}

impl std::fmt::Debug for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::Native { handle } => {
                f.debug_struct("Native").field("name", &handle.name()).finish()
            }
            ModuleKind::NativeShadowing {
                external_name,
                handle,
            } => f
                .debug_struct("NativeShadowing")
                .field("external_name", external_name)
                .field("handle", &handle.name())
                .finish(),
            ModuleKind::External { path } => {
                f.debug_struct("External").field("path", path).finish()
            }
            ModuleKind::Excluded { reason } => {
                f.debug_struct("Excluded").field("reason", reason).finish()
            }
        }
    }
}

impl ModuleKind {
    /// `true` for kinds dispatched to a native handler.
    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            ModuleKind::Native { .. } | ModuleKind::NativeShadowing { .. }
        )
    }
}

pub struct ModuleResolver {
    registry: Arc<NativeRegistry>,
    roots: Vec<PathBuf>,
    /// FQN → refusal reason. Closed set: side effects the controller
    /// cannot safely orchestrate.
    excluded: HashMap<&'static str, &'static str>,
    /// FQN → native short name.
    shadows: HashMap<&'static str, &'static str>,
}

impl ModuleResolver {
    #[must_use]
    pub fn new(registry: Arc<NativeRegistry>, roots: Vec<PathBuf>) -> Self {
        let excluded = HashMap::from([
            (
                "ansible.builtin.reboot",
                "rebooting the host would sever the controller's own transport",
            ),
            (
                "ansible.builtin.shutdown",
                "shutting the host down would sever the controller's own transport",
            ),
            (
                "ansible.builtin.pause",
                "interactive waits are not supported",
            ),
            (
                "ansible.builtin.meta",
                "control-flow meta-operations are not supported",
            ),
        ]);
        let shadows = HashMap::from([
            ("ansible.builtin.ping", "ping"),
            ("ansible.builtin.setup", "setup"),
        ]);
        Self {
            registry,
            roots,
            excluded,
            shadows,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NativeRegistry> {
        &self.registry
    }

    /// Classify `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::MalformedName`] for names that are neither
    /// bare nor three dotted parts, and [`ResolveError::NotFound`] when no
    /// root carries the module file.
    pub fn resolve(&self, name: &str) -> Result<ModuleKind, ResolveError> {
        if let Some(handle) = self.registry.get(name) {
            return Ok(ModuleKind::Native { handle });
        }
        if let Some(bare) = name.strip_prefix(NATIVE_PREFIX) {
            if let Some(handle) = self.registry.get(bare) {
                return Ok(ModuleKind::Native { handle });
            }
        }

        let fqn = self.qualify(name)?;
        if let Some(reason) = self.excluded.get(fqn.as_str()) {
            return Ok(ModuleKind::Excluded { reason });
        }
        if let Some(target) = self.shadows.get(fqn.as_str()) {
            if let Some(handle) = self.registry.get(target) {
                return Ok(ModuleKind::NativeShadowing {
                    external_name: fqn,
                    handle,
                });
            }
        }
        if let Some(path) = self.find_external(&fqn) {
            return Ok(ModuleKind::External { path });
        }
        Err(ResolveError::NotFound(fqn))
    }

    /// Expand `name` to `ns.coll.mod` form.
    fn qualify(&self, name: &str) -> Result<String, ResolveError> {
        let tokens: Vec<&str> = name.split('.').collect();
        match tokens.len() {
            1 => Ok(format!("{BUILTIN_NAMESPACE}.{BUILTIN_COLLECTION}.{name}")),
            3 if tokens.iter().all(|t| !t.is_empty()) => Ok(name.to_string()),
            _ => Err(ResolveError::MalformedName(name.to_string())),
        }
    }

    /// Search the configured roots for the module file; first hit wins.
    fn find_external(&self, fqn: &str) -> Option<PathBuf> {
        let mut parts = fqn.split('.');
        let (ns, coll, module) = (parts.next()?, parts.next()?, parts.next()?);
        for root in &self.roots {
            let candidate = root
                .join("collections")
                .join(ns)
                .join(coll)
                .join("modules")
                .join(format!("{module}.{MODULE_EXTENSION}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Resolve a requested bundle of external module names to `(name, file)`
    /// pairs for the agent builder. Native names are skipped; their remote
    /// counterparts ship with the embedded assets.
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure.
    pub fn resolve_bundle(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, PathBuf)>, ResolveError> {
        let mut bundle = Vec::new();
        for name in names {
            match self.resolve(name)? {
                ModuleKind::External { path } => {
                    let short = name.rsplit('.').next().unwrap_or(name).to_string();
                    bundle.push((short, path));
                }
                ModuleKind::Excluded { .. } => {
                    return Err(ResolveError::NotFound(name.clone()));
                }
                ModuleKind::Native { .. } | ModuleKind::NativeShadowing { .. } => {}
            }
        }
        Ok(bundle)
    }
}
