//! Audit trail for permission requests
//!
//! Provides a trait-based audit system so embedders can route permission
//! events (prompts, outcomes, rationales, stale callbacks) wherever they keep
//! diagnostics.

use rxperm_api::{PermissionKind, RequestToken};
use serde::Serialize;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Audit event representing one step of a permission request
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub event_type: AuditEventType,
    /// Correlation token, once one was allocated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<RequestToken>,
    pub permissions: Vec<PermissionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, permissions: &[PermissionKind]) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            token: None,
            permissions: permissions.to_vec(),
            reason: None,
        }
    }

    pub fn with_token(mut self, token: RequestToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A host prompt was dispatched
    PermissionRequested,
    /// The request completed with every permission granted
    PermissionGranted,
    /// The request completed with at least one denial
    PermissionDenied,
    /// A rationale surface was shown before prompting
    RationaleShown,
    /// A host callback arrived for a token that is not live
    StaleResult,
    /// The waiter went away before the host answered
    RequestAbandoned,
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Trait for audit event sinks
///
/// # Example
///
/// ```rust
/// use rxperm::audit::{AuditError, AuditEvent, AuditSink};
///
/// struct StderrAuditSink;
///
/// impl AuditSink for StderrAuditSink {
///     fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
///         eprintln!("{:?} {:?}", event.event_type, event.token);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AuditError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;

    fn is_healthy(&self) -> bool {
        true
    }
}

// ============================================================================
// Default Implementations
// ============================================================================

/// In-memory audit sink for testing
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Create a new memory sink with default capacity (1000 events)
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn find_by_token(&self, token: RequestToken) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.token == Some(token))
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.max_events {
            events.remove(0); // FIFO eviction
        }
        events.push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Audit sink that forwards events to `tracing` at INFO level
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "rxperm::audit",
            event_type = ?event.event_type,
            token = ?event.token,
            permissions = ?event.permissions,
            reason = event.reason.as_deref().unwrap_or(""),
            "permission audit"
        );
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Null audit sink (discards all events)
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl NullAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

// ============================================================================
// Helper functions
// ============================================================================

pub fn permission_requested(token: RequestToken, kinds: &[PermissionKind]) -> AuditEvent {
    AuditEvent::new(AuditEventType::PermissionRequested, kinds).with_token(token)
}

/// Outcome of a request; `token` is `None` when no prompt was needed
pub fn permission_outcome(
    token: Option<RequestToken>,
    kinds: &[PermissionKind],
    granted: bool,
) -> AuditEvent {
    let event_type = if granted {
        AuditEventType::PermissionGranted
    } else {
        AuditEventType::PermissionDenied
    };
    let event = AuditEvent::new(event_type, kinds);
    match token {
        Some(token) => event.with_token(token),
        None => event.with_reason("already granted"),
    }
}

pub fn rationale_shown(kinds: &[PermissionKind]) -> AuditEvent {
    AuditEvent::new(AuditEventType::RationaleShown, kinds)
}

pub fn stale_result(token: RequestToken, permissions: &[String]) -> AuditEvent {
    AuditEvent::new(AuditEventType::StaleResult, &[])
        .with_token(token)
        .with_reason(format!("unknown token for [{}]", permissions.join(", ")))
}

pub fn request_abandoned(token: RequestToken, kinds: &[PermissionKind]) -> AuditEvent {
    AuditEvent::new(AuditEventType::RequestAbandoned, kinds).with_token(token)
}
