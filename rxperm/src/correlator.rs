//! Request correlation table
//!
//! Matches an asynchronous host permission callback back to the future that
//! issued the prompt. Every prompt is tagged with a [`RequestToken`]; the
//! table maps live tokens to a single-shot notifier which the callback
//! fulfils exactly once.
//!
//! A token is live from allocation until its host callback arrives. A
//! request whose waiter goes away first leaves its token reserved as
//! abandoned: the native prompt is still outstanding, so the token cannot be
//! handed to another request until that late callback has been swallowed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use rxperm_api::{GrantResult, PermissionKind, RequestToken, BASE_REQUEST_TOKEN};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::PermissionError;

/// How the allocator picks the next token after one is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPolicy {
    /// Reset to one past the highest live token, or the base when idle
    #[default]
    Recycle,
    /// Keep counting up; wrap to the base on `i32` overflow
    Monotonic,
}

/// Correlator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// First token issued, and the reset point when the table empties
    pub base_token: RequestToken,
    /// Release behaviour of the allocator
    pub token_policy: TokenPolicy,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            base_token: BASE_REQUEST_TOKEN,
            token_policy: TokenPolicy::Recycle,
        }
    }
}

/// A prompt that was dispatched to the host and has not been answered
pub struct PendingRequest {
    serial: u64,
    kinds: Vec<PermissionKind>,
    notifier: oneshot::Sender<bool>,
}

impl PendingRequest {
    /// Permissions the prompt was issued for, in request order
    pub fn kinds(&self) -> &[PermissionKind] {
        &self.kinds
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("kinds", &self.kinds)
            .field("waiting", &!self.notifier.is_closed())
            .finish()
    }
}

struct CorrelationTable {
    pending: HashMap<RequestToken, PendingRequest>,
    /// Tokens whose waiter is gone but whose callback may still arrive
    abandoned: HashSet<RequestToken>,
    next: RequestToken,
    serial: u64,
}

impl CorrelationTable {
    fn is_reserved(&self, token: &RequestToken) -> bool {
        self.pending.contains_key(token) || self.abandoned.contains(token)
    }

    /// First candidate at or after `next` that is not reserved
    fn peek(&self, base: RequestToken) -> RequestToken {
        let mut candidate = self.next;
        while self.is_reserved(&candidate) {
            candidate = candidate.checked_next().unwrap_or(base);
        }
        candidate
    }

    fn mint(&mut self, base: RequestToken) -> RequestToken {
        let token = self.peek(base);
        self.next = token.checked_next().unwrap_or(base);
        token
    }

    fn release(&mut self, token: RequestToken, config: &CorrelatorConfig) -> Option<PendingRequest> {
        let request = self.pending.remove(&token)?;
        self.recompute_next(config);
        Some(request)
    }

    /// Drop the reservation left by an abandoned request
    fn retire(&mut self, token: RequestToken, config: &CorrelatorConfig) -> bool {
        if !self.abandoned.remove(&token) {
            return false;
        }
        self.recompute_next(config);
        true
    }

    fn recompute_next(&mut self, config: &CorrelatorConfig) {
        if config.token_policy != TokenPolicy::Recycle {
            return;
        }
        let highest = self.pending.keys().chain(self.abandoned.iter()).max();
        self.next = match highest {
            Some(max) => max.checked_next().unwrap_or(config.base_token),
            None => config.base_token,
        };
    }
}

/// Owns the token → pending request table and the token allocator
///
/// All table and allocator access happens under one lock, so allocation,
/// resolution and reclamation are mutually exclusive. Instances are
/// independent; share one behind an `Arc` to route host callbacks to it.
pub struct RequestCorrelator {
    config: CorrelatorConfig,
    table: Mutex<CorrelationTable>,
}

impl RequestCorrelator {
    /// Create a correlator starting at [`BASE_REQUEST_TOKEN`]
    pub fn new() -> Self {
        Self::with_config(CorrelatorConfig::default())
    }

    pub fn with_config(config: CorrelatorConfig) -> Self {
        Self {
            config,
            table: Mutex::new(CorrelationTable {
                pending: HashMap::new(),
                abandoned: HashSet::new(),
                next: config.base_token,
                serial: 0,
            }),
        }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    fn table(&self) -> MutexGuard<'_, CorrelationTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a token for `kinds` and register a pending notifier under it
    ///
    /// The returned token is never one that is currently live or abandoned.
    pub fn allocate(&self, kinds: impl Into<Vec<PermissionKind>>) -> (RequestToken, GrantNotifier) {
        let kinds = kinds.into();
        let (tx, rx) = oneshot::channel();

        let mut table = self.table();
        let token = table.mint(self.config.base_token);
        table.serial += 1;
        let serial = table.serial;
        table.pending.insert(
            token,
            PendingRequest {
                serial,
                kinds,
                notifier: tx,
            },
        );
        debug!(token = %token, pending = table.pending.len(), "Allocated request token");

        (token, GrantNotifier { token, serial, rx })
    }

    /// Deliver the host's per-permission results for `token`
    ///
    /// Returns `false` when the token is not live; for an abandoned token
    /// the reservation is dropped, otherwise nothing changes. For a live
    /// token the waiter receives `true` only if every result is granted, the
    /// token is released, and `true` is returned.
    pub fn resolve(&self, token: RequestToken, results: &[GrantResult]) -> bool {
        let request = {
            let mut table = self.table();
            match table.release(token, &self.config) {
                Some(request) => request,
                None => {
                    if table.retire(token, &self.config) {
                        debug!(token = %token, "Discarded late result for abandoned request");
                    } else {
                        warn!(token = %token, "Ignoring result for unknown request token");
                    }
                    return false;
                }
            }
        };

        let granted = results.iter().all(GrantResult::is_granted);
        debug!(token = %token, granted, "Resolved request token");
        if request.notifier.send(granted).is_err() {
            debug!(token = %token, "Request waiter dropped before the result arrived");
        }
        true
    }

    /// Remove `token` from the table and recompute the next token
    ///
    /// The removed request is returned; dropping it makes its waiter
    /// observe [`PermissionError::Abandoned`].
    pub fn reclaim(&self, token: RequestToken) -> Option<PendingRequest> {
        let released = self.table().release(token, &self.config);
        if released.is_some() {
            debug!(token = %token, "Reclaimed request token");
        }
        released
    }

    /// Mark `token` abandoned if it still belongs to the allocation `serial`
    ///
    /// The waiter is dropped but the token stays reserved until its host
    /// callback arrives, since the prompt tagged with it is still showing.
    pub(crate) fn abandon_allocation(&self, token: RequestToken, serial: u64) -> bool {
        let mut table = self.table();
        let owned = table
            .pending
            .get(&token)
            .is_some_and(|request| request.serial == serial);
        if owned {
            table.pending.remove(&token);
            table.abandoned.insert(token);
            debug!(
                token = %token,
                abandoned = table.abandoned.len(),
                "Request abandoned, token reserved until its callback"
            );
        }
        owned
    }

    /// The token the next `allocate` call would hand out
    pub fn next_token(&self) -> RequestToken {
        self.table().peek(self.config.base_token)
    }

    pub fn pending_count(&self) -> usize {
        self.table().pending.len()
    }

    pub fn is_pending(&self, token: RequestToken) -> bool {
        self.table().pending.contains_key(&token)
    }

    /// Whether `token` was abandoned and still awaits its late callback
    pub fn is_abandoned(&self, token: RequestToken) -> bool {
        self.table().abandoned.contains(&token)
    }

    pub fn abandoned_count(&self) -> usize {
        self.table().abandoned.len()
    }

    /// Permissions a live token was issued for
    pub fn pending_kinds(&self, token: RequestToken) -> Option<Vec<PermissionKind>> {
        self.table()
            .pending
            .get(&token)
            .map(|request| request.kinds.clone())
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .field("abandoned", &self.abandoned_count())
            .finish()
    }
}

/// Single-resolution handle for the outcome of one token
///
/// Resolves to the overall grant decision, or to
/// [`PermissionError::Abandoned`] if the pending entry was discarded without
/// a result.
#[derive(Debug)]
#[must_use = "the notifier does nothing unless awaited"]
pub struct GrantNotifier {
    token: RequestToken,
    serial: u64,
    rx: oneshot::Receiver<bool>,
}

impl GrantNotifier {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }
}

impl Future for GrantNotifier {
    type Output = Result<bool, PermissionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let token = self.token;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| PermissionError::Abandoned { token }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::collections::HashSet;
    use std::sync::Arc;

    use rxperm_api::GrantResult::{Denied, Granted};

    fn token(value: i32) -> RequestToken {
        RequestToken(value)
    }

    #[test]
    fn test_allocate_starts_at_base() {
        let correlator = RequestCorrelator::new();
        let (first, _n1) = correlator.allocate(vec![PermissionKind::Camera]);
        let (second, _n2) = correlator.allocate(vec![PermissionKind::Microphone]);

        assert_eq!(first, token(1000));
        assert_eq!(second, token(1001));
        assert_eq!(correlator.pending_count(), 2);
        assert_eq!(
            correlator.pending_kinds(second),
            Some(vec![PermissionKind::Microphone])
        );
    }

    #[test]
    fn test_resolve_all_granted() {
        let correlator = RequestCorrelator::new();
        let (t, notifier) = correlator.allocate(vec![PermissionKind::Camera, PermissionKind::Microphone]);

        assert!(correlator.resolve(t, &[Granted, Granted]));
        assert!(!correlator.is_pending(t));
        assert!(notifier.now_or_never().unwrap().unwrap());
    }

    #[test]
    fn test_resolve_any_denial_is_overall_denial() {
        let correlator = RequestCorrelator::new();
        let (t, notifier) = correlator.allocate(vec![PermissionKind::Camera, PermissionKind::Microphone]);

        assert!(correlator.resolve(t, &[Granted, Denied]));
        assert!(!notifier.now_or_never().unwrap().unwrap());
    }

    #[test]
    fn test_resolve_succeeds_once_per_token() {
        let correlator = RequestCorrelator::new();
        let (t, _notifier) = correlator.allocate(vec![PermissionKind::Camera]);

        assert!(correlator.resolve(t, &[Granted]));
        assert!(!correlator.resolve(t, &[Granted]));
        assert!(!correlator.resolve(token(4242), &[Granted]));
    }

    #[test]
    fn test_unknown_token_has_no_side_effects() {
        let correlator = RequestCorrelator::new();
        let (live, _notifier) = correlator.allocate(vec![PermissionKind::Camera]);

        assert!(!correlator.resolve(token(999), &[Denied]));
        assert!(correlator.is_pending(live));
        assert_eq!(correlator.next_token(), token(1001));
    }

    #[test]
    fn test_resolve_after_waiter_dropped_still_consumes_token() {
        let correlator = RequestCorrelator::new();
        let (t, notifier) = correlator.allocate(vec![PermissionKind::Camera]);
        drop(notifier);

        assert!(correlator.resolve(t, &[Granted]));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_recycle_after_releasing_highest() {
        let correlator = RequestCorrelator::new();
        let (a, _na) = correlator.allocate(vec![PermissionKind::Camera]);
        let (b, _nb) = correlator.allocate(vec![PermissionKind::Camera]);
        let (c, _nc) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!((a, b, c), (token(1000), token(1001), token(1002)));

        correlator.reclaim(c);
        assert_eq!(correlator.next_token(), token(1002));

        correlator.reclaim(a);
        correlator.reclaim(b);
        assert_eq!(correlator.next_token(), token(1000));

        let (again, _n) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(again, token(1000));
    }

    #[test]
    fn test_recycle_after_releasing_middle() {
        let correlator = RequestCorrelator::new();
        let (_a, _na) = correlator.allocate(vec![PermissionKind::Camera]);
        let (b, _nb) = correlator.allocate(vec![PermissionKind::Camera]);
        let (_c, _nc) = correlator.allocate(vec![PermissionKind::Camera]);

        assert!(correlator.resolve(b, &[Granted]));
        assert_eq!(correlator.next_token(), token(1003));
    }

    #[test]
    fn test_monotonic_policy_never_resets() {
        let correlator = RequestCorrelator::with_config(CorrelatorConfig {
            token_policy: TokenPolicy::Monotonic,
            ..Default::default()
        });
        let (a, _na) = correlator.allocate(vec![PermissionKind::Camera]);
        correlator.reclaim(a);

        let (b, _nb) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(b, token(1001));
    }

    #[test]
    fn test_monotonic_wraps_and_skips_live_tokens() {
        let base = token(i32::MAX - 2);
        let correlator = RequestCorrelator::with_config(CorrelatorConfig {
            base_token: base,
            token_policy: TokenPolicy::Monotonic,
        });
        let (first, _n1) = correlator.allocate(vec![PermissionKind::Camera]);
        let (_second, _n2) = correlator.allocate(vec![PermissionKind::Camera]);
        let (third, _n3) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(third, token(i32::MAX));

        correlator.reclaim(first);
        let (wrapped, _n4) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(wrapped, base);
    }

    #[test]
    fn test_reclaim_abandons_waiter() {
        let correlator = RequestCorrelator::new();
        let (t, notifier) = correlator.allocate(vec![PermissionKind::FineLocation]);

        let removed = correlator.reclaim(t).unwrap();
        assert_eq!(removed.kinds(), &[PermissionKind::FineLocation]);
        drop(removed);

        match notifier.now_or_never().unwrap() {
            Err(PermissionError::Abandoned { token: abandoned }) => assert_eq!(abandoned, t),
            other => panic!("Expected Abandoned, got {:?}", other),
        }
        assert!(correlator.reclaim(t).is_none());
    }

    #[test]
    fn test_abandon_allocation_ignores_reused_token() {
        let correlator = RequestCorrelator::new();
        let (t, old) = correlator.allocate(vec![PermissionKind::Camera]);
        assert!(correlator.resolve(t, &[Granted]));

        let (reused, _fresh) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(reused, t);

        assert!(!correlator.abandon_allocation(t, old.serial()));
        assert!(correlator.is_pending(reused));
        assert_eq!(correlator.abandoned_count(), 0);
    }

    #[test]
    fn test_abandoned_token_stays_reserved_until_late_callback() {
        let correlator = RequestCorrelator::new();
        let (t, notifier) = correlator.allocate(vec![PermissionKind::Microphone]);
        assert!(correlator.abandon_allocation(t, notifier.serial()));

        assert!(!correlator.is_pending(t));
        assert!(correlator.is_abandoned(t));
        assert!(matches!(
            notifier.now_or_never(),
            Some(Err(PermissionError::Abandoned { .. }))
        ));

        let (next, next_notifier) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(next, token(1001));

        // The microphone prompt's answer must not reach the camera request.
        assert!(!correlator.resolve(t, &[Granted]));
        assert!(!correlator.is_abandoned(t));
        assert!(correlator.is_pending(next));
        assert_eq!(correlator.next_token(), token(1002));

        assert!(correlator.resolve(next, &[Denied]));
        assert!(!next_notifier.now_or_never().unwrap().unwrap());
        assert_eq!(correlator.next_token(), token(1000));
    }

    #[test]
    fn test_monotonic_wrap_skips_abandoned_tokens() {
        let base = token(i32::MAX - 1);
        let correlator = RequestCorrelator::with_config(CorrelatorConfig {
            base_token: base,
            token_policy: TokenPolicy::Monotonic,
        });
        let (first, n1) = correlator.allocate(vec![PermissionKind::Camera]);
        assert!(correlator.abandon_allocation(first, n1.serial()));
        let (second, _n2) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(second, token(i32::MAX));

        correlator.reclaim(second);
        let (third, _n3) = correlator.allocate(vec![PermissionKind::Camera]);
        assert_eq!(third, token(i32::MAX));
    }

    #[test]
    fn test_concurrent_allocations_are_unique() {
        let correlator = Arc::new(RequestCorrelator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let correlator = Arc::clone(&correlator);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| correlator.allocate(vec![PermissionKind::Camera]).0)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for t in handle.join().unwrap() {
                assert!(seen.insert(t), "token {} issued twice", t);
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(correlator.pending_count(), 400);
    }
}
