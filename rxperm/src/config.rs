//! Configuration and builder for [`Permissions`]
//!
//! Settings can be written by hand, loaded from JSON, or set piecemeal on
//! [`PermissionsBuilder`].

use std::sync::Arc;

use rxperm_api::{RequestToken, BASE_REQUEST_TOKEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditSink, NullAuditSink};
use crate::correlator::{CorrelatorConfig, RequestCorrelator, TokenPolicy};
use crate::facade::Permissions;
use crate::host::PermissionHost;
use crate::rationale::RationalePolicy;

/// Error type for configuration loading and building
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse permissions config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid base token {0}: must not be negative")]
    InvalidBaseToken(RequestToken),

    #[error("No permission host configured")]
    MissingHost,
}

/// Tunable behaviour of a [`Permissions`] instance
///
/// ```json
/// { "base_token": 1000, "token_policy": "recycle", "rationale_policy": "first_kind" }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub base_token: RequestToken,
    pub token_policy: TokenPolicy,
    pub rationale_policy: RationalePolicy,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            base_token: BASE_REQUEST_TOKEN,
            token_policy: TokenPolicy::default(),
            rationale_policy: RationalePolicy::default(),
        }
    }
}

impl PermissionsConfig {
    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_token.value() < 0 {
            return Err(ConfigError::InvalidBaseToken(self.base_token));
        }
        Ok(())
    }

    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            base_token: self.base_token,
            token_policy: self.token_policy,
        }
    }
}

/// Builder for [`Permissions`]
///
/// A host is required. Without an explicit correlator a fresh one is created
/// from the config; a shared correlator keeps its own token settings.
pub struct PermissionsBuilder {
    host: Option<Arc<dyn PermissionHost>>,
    audit: Option<Arc<dyn AuditSink>>,
    correlator: Option<Arc<RequestCorrelator>>,
    config: PermissionsConfig,
}

impl PermissionsBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            audit: None,
            correlator: None,
            config: PermissionsConfig::default(),
        }
    }

    pub fn host(mut self, host: impl PermissionHost + 'static) -> Self {
        self.host = Some(Arc::new(host));
        self
    }

    /// Use a host the caller keeps a handle to
    pub fn shared_host(mut self, host: Arc<dyn PermissionHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    pub fn shared_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Route requests through an existing correlation table
    pub fn correlator(mut self, correlator: Arc<RequestCorrelator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    pub fn config(mut self, config: PermissionsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_token(mut self, token: RequestToken) -> Self {
        self.config.base_token = token;
        self
    }

    pub fn token_policy(mut self, policy: TokenPolicy) -> Self {
        self.config.token_policy = policy;
        self
    }

    pub fn rationale_policy(mut self, policy: RationalePolicy) -> Self {
        self.config.rationale_policy = policy;
        self
    }

    pub fn build(self) -> Result<Permissions, ConfigError> {
        self.config.validate()?;
        let host = self.host.ok_or(ConfigError::MissingHost)?;

        let correlator = match self.correlator {
            Some(correlator) => correlator,
            None => Arc::new(RequestCorrelator::with_config(
                self.config.correlator_config(),
            )),
        };

        Ok(Permissions::from_parts(
            host,
            correlator,
            self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            self.config.rationale_policy,
        ))
    }
}

impl Default for PermissionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryPermissionHost;

    #[test]
    fn test_config_defaults() {
        let config = PermissionsConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PermissionsConfig::default());
        assert_eq!(config.base_token, RequestToken(1000));
        assert_eq!(config.token_policy, TokenPolicy::Recycle);
        assert_eq!(config.rationale_policy, RationalePolicy::FirstKind);
    }

    #[test]
    fn test_config_from_json() {
        let config = PermissionsConfig::from_json_str(
            r#"{ "base_token": 7, "token_policy": "monotonic", "rationale_policy": "any_kind" }"#,
        )
        .unwrap();
        assert_eq!(config.base_token, RequestToken(7));
        assert_eq!(config.token_policy, TokenPolicy::Monotonic);
        assert_eq!(config.rationale_policy, RationalePolicy::AnyKind);
    }

    #[test]
    fn test_config_rejects_negative_base() {
        match PermissionsConfig::from_json_str(r#"{ "base_token": -5 }"#) {
            Err(ConfigError::InvalidBaseToken(token)) => assert_eq!(token, RequestToken(-5)),
            other => panic!("Expected InvalidBaseToken, got {:?}", other),
        }
        assert!(matches!(
            PermissionsConfig::from_json_str("not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_builder_requires_host() {
        assert!(matches!(
            PermissionsBuilder::new().build(),
            Err(ConfigError::MissingHost)
        ));
    }

    #[test]
    fn test_builder_applies_config() {
        let permissions = Permissions::builder()
            .host(MemoryPermissionHost::new())
            .base_token(RequestToken(50))
            .token_policy(TokenPolicy::Monotonic)
            .rationale_policy(RationalePolicy::AnyKind)
            .build()
            .unwrap();

        assert_eq!(permissions.correlator().next_token(), RequestToken(50));
        assert_eq!(
            permissions.correlator().config().token_policy,
            TokenPolicy::Monotonic
        );
        assert_eq!(permissions.rationale_policy(), RationalePolicy::AnyKind);
    }

    #[test]
    fn test_builder_shares_correlator() {
        let correlator = Arc::new(RequestCorrelator::new());
        let first = Permissions::builder()
            .host(MemoryPermissionHost::new())
            .correlator(correlator.clone())
            .build()
            .unwrap();
        let second = Permissions::builder()
            .host(MemoryPermissionHost::new())
            .correlator(correlator.clone())
            .build()
            .unwrap();

        assert!(Arc::ptr_eq(first.correlator(), second.correlator()));
    }
}
