//! Content-addressed assembly of the agent archive.
//!
//! The archive is a zip with the embedded agent source as `__main__.py` and
//! each bundled extension at the archive root, so a remote Python
//! interpreter can execute it directly. The cache key is the first 16 hex
//! characters of SHA-256 over the source bytes and the sorted extension
//! names; any change to either yields a new file. Cache entries are never
//! mutated, and concurrent builds for the same hash race benignly: the
//! atomic rename makes one winner visible and the losers' work discardable.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::assets;
use crate::errors::BuildError;

/// Number of leading hex characters of the digest used as the cache key.
const HASH_LEN: usize = 16;

/// A built agent archive, addressed by its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentArtifact {
    pub hash: String,
    pub path: PathBuf,
}

impl AgentArtifact {
    /// Deployment path for this artifact on a remote host.
    #[must_use]
    pub fn remote_path(&self) -> String {
        format!("/tmp/agent-{}.pyz", self.hash)
    }
}

/// Assembles agent archives into a local cache directory.
pub struct AgentBuilder {
    source: Vec<u8>,
    /// `(name, resolved file)` pairs, kept sorted by name so the hash is
    /// independent of request order.
    extensions: Vec<(String, PathBuf)>,
    cache_dir: PathBuf,
}

impl AgentBuilder {
    /// Builder over the embedded agent source.
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> Self {
        Self::with_source(assets::agent_source().to_vec(), cache_dir)
    }

    /// Builder over an explicit source blob (used in tests).
    #[must_use]
    pub fn with_source(source: Vec<u8>, cache_dir: PathBuf) -> Self {
        Self {
            source,
            extensions: Vec::new(),
            cache_dir,
        }
    }

    /// Bundle the given extension files into the archive.
    #[must_use]
    pub fn with_extensions(mut self, mut extensions: Vec<(String, PathBuf)>) -> Self {
        extensions.sort_by(|a, b| a.0.cmp(&b.0));
        extensions.dedup_by(|a, b| a.0 == b.0);
        self.extensions = extensions;
        self
    }

    /// Content hash over the source bytes and the sorted extension names.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.source);
        for (name, _) in &self.extensions {
            hasher.update(name.as_bytes());
            hasher.update(b"\n");
        }
        let mut hex = hex_encode(&hasher.finalize());
        hex.truncate(HASH_LEN);
        hex
    }

    /// Return the cached archive for the current inputs, building it first
    /// if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an extension file cannot be read or the archive
    /// cannot be written. Partial artifacts are removed on failure.
    pub fn build(&self) -> Result<AgentArtifact, BuildError> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let hash = self.hash();
        let candidate = self.cache_dir.join(format!("agent-{hash}.pyz"));

        if let Ok(meta) = std::fs::metadata(&candidate) {
            if meta.len() > 0 {
                debug!(%hash, path = %candidate.display(), "agent archive cache hit");
                return Ok(AgentArtifact {
                    hash,
                    path: candidate,
                });
            }
        }

        self.assemble(&hash, &candidate)?;
        info!(%hash, path = %candidate.display(), "agent archive built");
        Ok(AgentArtifact {
            hash,
            path: candidate,
        })
    }

    fn assemble(&self, hash: &str, candidate: &Path) -> Result<(), BuildError> {
        // Stage the inputs in a scratch directory, removed on drop.
        let scratch = tempfile::Builder::new()
            .prefix("agent-build-")
            .tempdir_in(&self.cache_dir)?;
        std::fs::write(scratch.path().join("__main__.py"), &self.source)?;
        for (name, source_path) in &self.extensions {
            let data = std::fs::read(source_path)
                .map_err(|_| BuildError::UnknownExtension(name.clone()))?;
            std::fs::write(scratch.path().join(format!("{name}.py")), data)?;
        }

        // Write the archive next to the candidate, then rename into place.
        // NamedTempFile deletes the partial artifact if anything below fails.
        let mut staged = tempfile::Builder::new()
            .prefix(&format!("agent-{hash}-"))
            .suffix(".tmp")
            .tempfile_in(&self.cache_dir)?;
        {
            let mut archive = ZipWriter::new(staged.as_file_mut());
            let options = SimpleFileOptions::default().unix_permissions(0o644);

            archive.start_file("__main__.py", options)?;
            archive.write_all(&std::fs::read(scratch.path().join("__main__.py"))?)?;
            for (name, _) in &self.extensions {
                let file_name = format!("{name}.py");
                archive.start_file(&file_name, options)?;
                archive.write_all(&std::fs::read(scratch.path().join(&file_name))?)?;
            }
            archive.finish()?;
        }
        staged
            .persist(candidate)
            .map_err(|e| BuildError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Encode bytes as lowercase hex.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from(HEX[(b >> 4) as usize]));
        out.push(char::from(HEX[(b & 0xf) as usize]));
    }
    out
}
