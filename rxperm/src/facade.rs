//! Permission façade
//!
//! [`Permissions`] turns the host's "check / prompt / callback" API into
//! futures. Grant checks are synchronous; requests return futures that
//! resolve once the host callback for their token arrives.
//!
//! Every future returned here is lazy: nothing is checked, allocated, shown
//! or prompted until it is first polled, so the grant state observed is the
//! state at the moment of consumption.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rxperm_api::{GrantResult, PermissionKind, RequestToken};
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEvent, AuditSink, NullAuditSink};
use crate::config::PermissionsBuilder;
use crate::correlator::RequestCorrelator;
use crate::error::PermissionError;
use crate::host::PermissionHost;
use crate::rationale::{self, RationaleDialog, RationalePolicy};

/// Future-based entry point to the host permission API
///
/// Cheap to clone; clones share the host, the correlation table and the
/// audit sink. Route the host's permission-result callback to
/// [`on_request_permissions_result`](Self::on_request_permissions_result)
/// on any clone.
#[derive(Clone)]
pub struct Permissions {
    host: Arc<dyn PermissionHost>,
    correlator: Arc<RequestCorrelator>,
    audit: Arc<dyn AuditSink>,
    rationale_policy: RationalePolicy,
}

impl Permissions {
    /// Façade over `host` with a fresh correlator and no audit trail
    pub fn new(host: impl PermissionHost + 'static) -> Self {
        Self::from_parts(
            Arc::new(host),
            Arc::new(RequestCorrelator::new()),
            Arc::new(NullAuditSink),
            RationalePolicy::default(),
        )
    }

    pub fn builder() -> PermissionsBuilder {
        PermissionsBuilder::new()
    }

    pub(crate) fn from_parts(
        host: Arc<dyn PermissionHost>,
        correlator: Arc<RequestCorrelator>,
        audit: Arc<dyn AuditSink>,
        rationale_policy: RationalePolicy,
    ) -> Self {
        Self {
            host,
            correlator,
            audit,
            rationale_policy,
        }
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn rationale_policy(&self) -> RationalePolicy {
        self.rationale_policy
    }

    /// Current grant state of one permission
    pub fn is_granted(&self, kind: PermissionKind) -> Result<bool, PermissionError> {
        Ok(self.host.check_permission(kind.as_str())?.is_granted())
    }

    /// Whether every permission in `kinds` is granted
    ///
    /// Checks run in order and stop at the first denial.
    pub fn are_granted(&self, kinds: &[PermissionKind]) -> Result<bool, PermissionError> {
        for kind in kinds {
            if !self.is_granted(*kind)? {
                debug!(permission = %kind, "Permission not granted");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Snapshot of the grant state of `kinds`, taken when first polled
    pub fn observe(
        &self,
        kinds: impl Into<Vec<PermissionKind>>,
    ) -> impl Future<Output = Result<bool, PermissionError>> + Send + 'static {
        let this = self.clone();
        let kinds = kinds.into();
        async move { this.are_granted(&kinds) }
    }

    pub fn observe_one(
        &self,
        kind: PermissionKind,
    ) -> impl Future<Output = Result<bool, PermissionError>> + Send + 'static {
        self.observe(vec![kind])
    }

    /// Ensure `kinds` are granted, prompting the host if needed
    ///
    /// Resolves to `true` straight away when everything is already granted.
    /// Otherwise a token is allocated, the host prompt is shown for the
    /// exact permission list, and the future completes when the host
    /// callback for that token arrives. A single denial makes the whole
    /// request denied. There is no timeout. Dropping the future before the
    /// callback abandons the request: its token stays reserved, and the late
    /// callback is swallowed instead of reaching a newer request.
    pub fn request(
        &self,
        kinds: impl Into<Vec<PermissionKind>>,
    ) -> impl Future<Output = Result<bool, PermissionError>> + Send + 'static {
        let this = self.clone();
        let kinds = kinds.into();
        async move { this.ensure_granted(kinds).await }
    }

    pub fn request_one(
        &self,
        kind: PermissionKind,
    ) -> impl Future<Output = Result<bool, PermissionError>> + Send + 'static {
        self.request(vec![kind])
    }

    /// Like [`request`](Self::request), but waits for `rationale` first when
    /// the host suggests explaining the permission
    ///
    /// `rationale` is only polled when the rationale is needed, after the
    /// returned future itself is polled.
    pub fn request_with_rationale<R>(
        &self,
        rationale: R,
        kinds: impl Into<Vec<PermissionKind>>,
    ) -> impl Future<Output = Result<bool, PermissionError>> + Send + 'static
    where
        R: Future<Output = ()> + Send + 'static,
    {
        let this = self.clone();
        let kinds = kinds.into();
        async move {
            if this.should_show_rationale(&kinds)? {
                info!(permissions = ?kinds, "Waiting for rationale acknowledgement");
                this.record(audit::rationale_shown(&kinds));
                rationale.await;
            }
            this.ensure_granted(kinds).await
        }
    }

    /// [`request_with_rationale`](Self::request_with_rationale) with a dialog
    /// that is shown lazily and acknowledged through its
    /// [`RationaleAck`](crate::rationale::RationaleAck)
    pub fn request_with_dialog(
        &self,
        dialog: Arc<dyn RationaleDialog>,
        kinds: impl Into<Vec<PermissionKind>>,
    ) -> impl Future<Output = Result<bool, PermissionError>> + Send + 'static {
        self.request_with_rationale(rationale::show_and_wait(dialog), kinds)
    }

    /// Host callback entry point
    ///
    /// Returns `false` for a token this process is not waiting on.
    pub fn on_request_permissions_result<S: AsRef<str>>(
        &self,
        token: RequestToken,
        permissions: &[S],
        results: &[GrantResult],
    ) -> bool {
        let names: Vec<&str> = permissions.iter().map(AsRef::<str>::as_ref).collect();
        // Advisory only: the token identifies the request, and an interrupted
        // prompt legitimately reports empty permission and result lists.
        if let Some(kinds) = self.correlator.pending_kinds(token) {
            let requested: Vec<&str> = kinds.iter().map(PermissionKind::as_str).collect();
            if requested != names {
                warn!(
                    token = %token,
                    requested = ?requested,
                    received = ?names,
                    "Host callback permissions differ from the request"
                );
            }
        }

        let resolved = self.correlator.resolve(token, results);
        if !resolved {
            let names: Vec<String> = names.into_iter().map(String::from).collect();
            self.record(audit::stale_result(token, &names));
        }
        resolved
    }

    fn should_show_rationale(&self, kinds: &[PermissionKind]) -> Result<bool, PermissionError> {
        for kind in self.rationale_policy.candidates(kinds) {
            if self.host.should_show_rationale(kind.as_str())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn ensure_granted(&self, kinds: Vec<PermissionKind>) -> Result<bool, PermissionError> {
        if self.are_granted(&kinds)? {
            debug!(permissions = ?kinds, "Already granted, skipping prompt");
            self.record(audit::permission_outcome(None, &kinds, true));
            return Ok(true);
        }
        self.prompt(kinds).await
    }

    async fn prompt(&self, kinds: Vec<PermissionKind>) -> Result<bool, PermissionError> {
        let permissions: Vec<&'static str> = kinds.iter().map(PermissionKind::as_str).collect();
        let (token, notifier) = self.correlator.allocate(kinds.clone());
        let mut guard = AbandonGuard {
            permissions: self,
            token,
            serial: notifier.serial(),
            kinds: &kinds,
            armed: true,
        };

        self.record(audit::permission_requested(token, &kinds));
        info!(token = %token, permissions = ?permissions, "Prompting for permissions");
        if let Err(err) = self.host.request_permissions(&permissions, token) {
            warn!(token = %token, error = %err, "Host refused to show the permission prompt");
            // No prompt is showing, so no callback can arrive for this token.
            guard.armed = false;
            self.correlator.reclaim(token);
            self.record(audit::request_abandoned(token, &kinds));
            return Err(err.into());
        }

        let outcome = notifier.await;
        guard.armed = false;
        let granted = outcome?;

        self.record(audit::permission_outcome(Some(token), &kinds, granted));
        Ok(granted)
    }

    fn record(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(event) {
            warn!(error = %err, "Failed to record permission audit event");
        }
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permissions")
            .field("correlator", &self.correlator)
            .field("rationale_policy", &self.rationale_policy)
            .finish_non_exhaustive()
    }
}

/// Abandons a token whose request future is dropped before its callback
struct AbandonGuard<'a> {
    permissions: &'a Permissions,
    token: RequestToken,
    serial: u64,
    kinds: &'a [PermissionKind],
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self
            .permissions
            .correlator
            .abandon_allocation(self.token, self.serial)
        {
            debug!(token = %self.token, "Request dropped before the host answered");
            self.permissions
                .record(audit::request_abandoned(self.token, self.kinds));
        }
    }
}
