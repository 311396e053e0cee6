//! Host platform permission API
//!
//! The runtime never talks to the operating system directly. Embedders
//! implement [`PermissionHost`] over their platform bindings; the provided
//! [`MemoryPermissionHost`] keeps grant state in memory and records prompts,
//! which is what tests and simulators want.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rxperm_api::{GrantResult, PermissionKind, RequestToken};
use thiserror::Error;

/// Error raised by a host permission call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Host permission service unavailable: {0}")]
    Unavailable(String),

    #[error("Host rejected {permission}: {reason}")]
    Rejected { permission: String, reason: String },
}

/// Outbound calls into the host platform's permission API
///
/// Permissions are passed as host permission strings
/// (see [`PermissionKind::as_str`]).
///
/// # Example
///
/// ```rust
/// use rxperm::host::{HostError, PermissionHost};
/// use rxperm::{GrantResult, RequestToken};
///
/// struct EverythingGranted;
///
/// impl PermissionHost for EverythingGranted {
///     fn check_permission(&self, _permission: &str) -> Result<GrantResult, HostError> {
///         Ok(GrantResult::Granted)
///     }
///
///     fn request_permissions(
///         &self,
///         _permissions: &[&str],
///         _token: RequestToken,
///     ) -> Result<(), HostError> {
///         Ok(())
///     }
///
///     fn should_show_rationale(&self, _permission: &str) -> Result<bool, HostError> {
///         Ok(false)
///     }
/// }
/// ```
pub trait PermissionHost: Send + Sync {
    /// Current grant state of one permission
    fn check_permission(&self, permission: &str) -> Result<GrantResult, HostError>;

    /// Show the native prompt for `permissions`, tagged with `token`
    ///
    /// Fire-and-forget: the answer arrives later through the host callback.
    fn request_permissions(&self, permissions: &[&str], token: RequestToken)
        -> Result<(), HostError>;

    /// Whether the platform suggests explaining `permission` before asking
    fn should_show_rationale(&self, permission: &str) -> Result<bool, HostError>;
}

// ============================================================================
// In-Memory Host
// ============================================================================

/// A prompt dispatched to a [`MemoryPermissionHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub token: RequestToken,
    pub permissions: Vec<String>,
}

#[derive(Debug, Default)]
struct HostState {
    granted: HashSet<String>,
    rationale: HashSet<String>,
    failing: HashMap<String, String>,
    failing_rationale: HashMap<String, String>,
    prompts: Vec<RecordedPrompt>,
    checks: HashMap<String, usize>,
    rationale_queries: usize,
    reject_prompts: Option<String>,
}

/// In-memory host for tests and simulation
///
/// Nothing is granted initially. Prompts are recorded but never answered;
/// feed results back through the façade's callback entry point.
#[derive(Default)]
pub struct MemoryPermissionHost {
    state: RwLock<HostState>,
}

impl MemoryPermissionHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `kinds` already granted
    pub fn with_granted(kinds: &[PermissionKind]) -> Self {
        let host = Self::new();
        for kind in kinds {
            host.grant(*kind);
        }
        host
    }

    fn read(&self) -> RwLockReadGuard<'_, HostState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HostState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn grant(&self, kind: PermissionKind) {
        self.write().granted.insert(kind.as_str().to_string());
    }

    pub fn revoke(&self, kind: PermissionKind) {
        self.write().granted.remove(kind.as_str());
    }

    /// Set the answer to "should a rationale be shown" for `kind`
    pub fn set_rationale(&self, kind: PermissionKind, show: bool) {
        let mut state = self.write();
        if show {
            state.rationale.insert(kind.as_str().to_string());
        } else {
            state.rationale.remove(kind.as_str());
        }
    }

    /// Make grant checks for `kind` fail with [`HostError::Unavailable`]
    pub fn fail_checks(&self, kind: PermissionKind, reason: impl Into<String>) {
        self.write()
            .failing
            .insert(kind.as_str().to_string(), reason.into());
    }

    /// Make rationale queries for `kind` fail with [`HostError::Unavailable`]
    pub fn fail_rationale(&self, kind: PermissionKind, reason: impl Into<String>) {
        self.write()
            .failing_rationale
            .insert(kind.as_str().to_string(), reason.into());
    }

    /// Make every prompt dispatch fail with [`HostError::Rejected`]
    pub fn reject_prompts(&self, reason: impl Into<String>) {
        self.write().reject_prompts = Some(reason.into());
    }

    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.read().prompts.clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.read().prompts.len()
    }

    pub fn last_prompt(&self) -> Option<RecordedPrompt> {
        self.read().prompts.last().cloned()
    }

    /// How many times the grant state of `kind` was queried
    pub fn check_count(&self, kind: PermissionKind) -> usize {
        self.read().checks.get(kind.as_str()).copied().unwrap_or(0)
    }

    pub fn rationale_query_count(&self) -> usize {
        self.read().rationale_queries
    }
}

impl PermissionHost for MemoryPermissionHost {
    fn check_permission(&self, permission: &str) -> Result<GrantResult, HostError> {
        let mut state = self.write();
        *state.checks.entry(permission.to_string()).or_default() += 1;

        if let Some(reason) = state.failing.get(permission) {
            return Err(HostError::Unavailable(reason.clone()));
        }
        Ok(GrantResult::from(state.granted.contains(permission)))
    }

    fn request_permissions(
        &self,
        permissions: &[&str],
        token: RequestToken,
    ) -> Result<(), HostError> {
        let mut state = self.write();
        if let Some(reason) = &state.reject_prompts {
            return Err(HostError::Rejected {
                permission: permissions.join(", "),
                reason: reason.clone(),
            });
        }
        state.prompts.push(RecordedPrompt {
            token,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        });
        Ok(())
    }

    fn should_show_rationale(&self, permission: &str) -> Result<bool, HostError> {
        let mut state = self.write();
        state.rationale_queries += 1;

        if let Some(reason) = state.failing_rationale.get(permission) {
            return Err(HostError::Unavailable(reason.clone()));
        }
        Ok(state.rationale.contains(permission))
    }
}

impl fmt::Debug for MemoryPermissionHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("MemoryPermissionHost")
            .field("granted", &state.granted.len())
            .field("prompts", &state.prompts.len())
            .finish()
    }
}
