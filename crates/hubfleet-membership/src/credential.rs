//! Credential handles and transient staging.
//!
//! A [`Credential`] wraps the raw kubeconfig of a member cluster. It is never
//! printed. Components that need a file on disk call [`Credential::stage`],
//! which writes the payload to a private temporary file that is removed when
//! the returned [`StagedCredential`] goes out of scope, whichever way the
//! caller exits.

use std::fmt;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::Result;

/// Opaque handle to a member cluster credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw kubeconfig document.
    #[must_use]
    pub fn from_kubeconfig(kubeconfig: impl Into<String>) -> Self {
        Self(kubeconfig.into())
    }

    /// The raw payload. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the payload is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Write the payload to a temporary file readable only by this process's user.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn stage(&self) -> Result<StagedCredential> {
        let mut file = tempfile::Builder::new()
            .prefix("hubfleet-kubeconfig-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(self.0.as_bytes())?;
        file.flush()?;

        tracing::debug!(path = %file.path().display(), "Staged credential");
        Ok(StagedCredential { file })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A credential materialized on disk.
///
/// The file is created with mode `0600` and deleted on drop.
#[derive(Debug)]
pub struct StagedCredential {
    file: NamedTempFile,
}

impl StagedCredential {
    /// Path of the staged file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
