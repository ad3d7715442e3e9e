//! Sandbox enforcement.
//!
//! The orchestrator depends only on the [`SandboxBackend`] contract: given a
//! capability class, produce the [`Confinement`] the handler must run under.
//! The OS-level mechanism (Landlock, Seatbelt, a container) is a pluggable
//! backend selected by platform; [`PolicyBackend`] is the portable one that
//! derives confinement straight from the configured policy and relies on
//! handlers honoring it cooperatively.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::CapabilityClass;

pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

/// Raised by a backend when an action hits a restriction. Distinguishable
/// from an ordinary tool failure so `OnFailure` escalation can trigger.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("write outside writable roots: {0}")]
    WriteDenied(PathBuf),

    #[error("network access to '{0}' denied (not in allow-list)")]
    NetworkDenied(String),

    #[error("process exceeded sandbox limits: {0}")]
    ExecLimit(String),

    #[error("sandbox backend unavailable: {0}")]
    Unavailable(String),
}

/// Resource bounds for a sandboxed child execution context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecLimits {
    pub max_duration: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(120),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Declarative sandbox configuration carried in `RuntimeConfig`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub enabled: bool,
    /// Roots under which `FileWrite` actions are permitted.
    pub writable_roots: Vec<PathBuf>,
    /// Hosts reachable by `NetworkAccess` actions. Deny-by-default.
    pub allowed_hosts: Vec<String>,
    pub exec: ExecLimits,
}

impl SandboxPolicy {
    pub fn workspace(root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            writable_roots: vec![root.into()],
            allowed_hosts: Vec::new(),
            exec: ExecLimits::default(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            writable_roots: Vec::new(),
            allowed_hosts: Vec::new(),
            exec: ExecLimits::default(),
        }
    }

    pub fn with_writable_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.writable_roots.push(root.into());
        self
    }

    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    pub fn with_exec_limits(mut self, exec: ExecLimits) -> Self {
        self.exec = exec;
        self
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// The restriction set one tool call runs under.
///
/// `None` fields mean unrestricted. Handlers consult the checks before
/// performing the matching side effect.
#[derive(Clone, Debug, Default)]
pub struct Confinement {
    write_roots: Option<Vec<PathBuf>>,
    allowed_hosts: Option<Vec<String>>,
    exec: Option<ExecLimits>,
}

impl Confinement {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_restricted(&self) -> bool {
        self.write_roots.is_some() || self.allowed_hosts.is_some() || self.exec.is_some()
    }

    pub fn check_write(&self, path: &Path) -> SandboxResult<()> {
        match &self.write_roots {
            None => Ok(()),
            Some(roots) => {
                if roots.iter().any(|root| path.starts_with(root)) {
                    Ok(())
                } else {
                    Err(SandboxError::WriteDenied(path.to_path_buf()))
                }
            }
        }
    }

    pub fn check_host(&self, host: &str) -> SandboxResult<()> {
        match &self.allowed_hosts {
            None => Ok(()),
            Some(hosts) => {
                let allowed = hosts
                    .iter()
                    .any(|entry| host == entry || host.ends_with(&format!(".{}", entry)));
                if allowed {
                    Ok(())
                } else {
                    Err(SandboxError::NetworkDenied(host.to_string()))
                }
            }
        }
    }

    pub fn exec_limits(&self) -> Option<&ExecLimits> {
        self.exec.as_ref()
    }
}

/// Pluggable enforcement mechanism.
pub trait SandboxBackend: Send + Sync {
    fn is_available(&self) -> bool;

    /// Produce the confinement for one call of the given class.
    fn restrict(&self, class: CapabilityClass) -> SandboxResult<Confinement>;
}

/// Portable backend deriving confinement from [`SandboxPolicy`].
pub struct PolicyBackend {
    policy: SandboxPolicy,
}

impl PolicyBackend {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    pub fn unrestricted() -> Self {
        Self {
            policy: SandboxPolicy::disabled(),
        }
    }
}

impl SandboxBackend for PolicyBackend {
    fn is_available(&self) -> bool {
        true
    }

    fn restrict(&self, class: CapabilityClass) -> SandboxResult<Confinement> {
        if !self.policy.enabled {
            return Ok(Confinement::unrestricted());
        }

        let confinement = match class {
            CapabilityClass::ReadOnly => Confinement::unrestricted(),
            CapabilityClass::FileWrite => Confinement {
                write_roots: Some(self.policy.writable_roots.clone()),
                ..Default::default()
            },
            CapabilityClass::NetworkAccess => Confinement {
                allowed_hosts: Some(self.policy.allowed_hosts.clone()),
                ..Default::default()
            },
            CapabilityClass::ProcessExecute => Confinement {
                write_roots: Some(self.policy.writable_roots.clone()),
                exec: Some(self.policy.exec.clone()),
                ..Default::default()
            },
        };

        Ok(confinement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_policy_is_unrestricted() {
        let backend = PolicyBackend::unrestricted();
        let confinement = backend.restrict(CapabilityClass::FileWrite).unwrap();
        assert!(!confinement.is_restricted());
        assert!(confinement.check_write(Path::new("/anywhere")).is_ok());
    }

    #[test]
    fn test_write_confined_to_roots() {
        let backend = PolicyBackend::new(SandboxPolicy::workspace("/workspace"));
        let confinement = backend.restrict(CapabilityClass::FileWrite).unwrap();

        assert!(
            confinement
                .check_write(Path::new("/workspace/src/main.rs"))
                .is_ok()
        );
        let err = confinement
            .check_write(Path::new("/etc/passwd"))
            .unwrap_err();
        assert!(matches!(err, SandboxError::WriteDenied(_)));
    }

    #[test]
    fn test_network_deny_by_default() {
        let backend = PolicyBackend::new(SandboxPolicy::workspace("/workspace"));
        let confinement = backend.restrict(CapabilityClass::NetworkAccess).unwrap();

        assert!(matches!(
            confinement.check_host("example.com").unwrap_err(),
            SandboxError::NetworkDenied(_)
        ));

        let backend = PolicyBackend::new(
            SandboxPolicy::workspace("/workspace").with_allowed_host("example.com"),
        );
        let confinement = backend.restrict(CapabilityClass::NetworkAccess).unwrap();
        assert!(confinement.check_host("example.com").is_ok());
        assert!(confinement.check_host("api.example.com").is_ok());
        assert!(confinement.check_host("evil.com").is_err());
    }

    #[test]
    fn test_exec_limits_attached_to_process_class() {
        let backend = PolicyBackend::new(SandboxPolicy::workspace("/workspace"));
        let confinement = backend.restrict(CapabilityClass::ProcessExecute).unwrap();
        assert!(confinement.exec_limits().is_some());

        let reads = backend.restrict(CapabilityClass::ReadOnly).unwrap();
        assert!(reads.exec_limits().is_none());
    }

    #[test]
    fn test_reads_never_confined() {
        let backend = PolicyBackend::new(SandboxPolicy::workspace("/workspace"));
        let confinement = backend.restrict(CapabilityClass::ReadOnly).unwrap();
        assert!(!confinement.is_restricted());
    }

    #[test]
    fn test_write_confinement_against_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();

        let backend = PolicyBackend::new(SandboxPolicy::workspace(&root));
        let confinement = backend.restrict(CapabilityClass::FileWrite).unwrap();

        assert!(confinement.check_write(&root.join("notes.txt")).is_ok());
        assert!(
            confinement
                .check_write(&root.join("nested/deeper/file.rs"))
                .is_ok()
        );
        assert!(confinement.check_write(Path::new("/tmp-other")).is_err());
    }
}
