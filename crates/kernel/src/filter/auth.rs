use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use control_plane::AuthPolicy;
use tracing::debug;

use super::{FilterChain, InboundFilter};
use crate::fault::{FaultType, GovernanceError};
use crate::invocation::Invocation;
use crate::pipeline::FilterKey;
use crate::types::{GovernedRequest, HEADER_SERVICE_APPLICATION, HEADER_SERVICE_TOKEN};

pub const TOKEN_AUTH: &str = "token";

pub trait Authenticator: Send + Sync {
    fn auth_type(&self) -> &str;
    fn authenticate(&self, policy: &AuthPolicy, request: &dyn GovernedRequest) -> Result<(), String>;
    /// Adds credentials to an outgoing call.
    fn inject(&self, policy: &AuthPolicy, request: &mut dyn GovernedRequest);
}

/// Shared token carried in a header, `x-service-token` unless the policy's
/// `header` param names another.
pub struct TokenAuthenticator;

impl TokenAuthenticator {
    fn header(policy: &AuthPolicy) -> &str {
        policy.param("header").unwrap_or(HEADER_SERVICE_TOKEN)
    }
}

impl Authenticator for TokenAuthenticator {
    fn auth_type(&self) -> &str {
        TOKEN_AUTH
    }

    fn authenticate(&self, policy: &AuthPolicy, request: &dyn GovernedRequest) -> Result<(), String> {
        let Some(expected) = policy.param("token") else {
            return Ok(());
        };
        match request.header(Self::header(policy)) {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err("invalid token".to_string()),
            None => Err("missing token".to_string()),
        }
    }

    fn inject(&self, policy: &AuthPolicy, request: &mut dyn GovernedRequest) {
        if let Some(token) = policy.param("token") {
            request.set_header(Self::header(policy), token.to_string());
        }
    }
}

pub struct AuthFilter {
    authenticators: HashMap<String, Arc<dyn Authenticator>>,
}

impl AuthFilter {
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self {
            authenticators: authenticators
                .into_iter()
                .map(|auth| (auth.auth_type().to_string(), auth))
                .collect(),
        }
    }

    fn check(&self, invocation: &Invocation) -> Result<(), GovernanceError> {
        let policy = invocation.service().policy.clone();
        let Some(auth) = policy.auth.as_ref() else {
            return Ok(());
        };
        let caller = invocation.request().header(HEADER_SERVICE_APPLICATION);
        if !auth.admits(caller) {
            return Err(invocation.reject(
                FaultType::Authenticated,
                format!("caller {} is not allowed", caller.unwrap_or("<unknown>")),
            ));
        }
        let Some(auth_type) = auth.auth_type.as_deref() else {
            return Ok(());
        };
        let Some(authenticator) = self.authenticators.get(auth_type) else {
            return Err(invocation.reject(
                FaultType::Unauthorized,
                format!("unsupported auth type {auth_type}"),
            ));
        };
        authenticator
            .authenticate(auth, invocation.request())
            .map_err(|reason| invocation.reject(FaultType::Unauthorized, reason))
    }

    /// Adds the target service's credentials to an outbound call.
    pub fn inject(&self, invocation: &mut Invocation) {
        let policy = invocation.service().policy.clone();
        let Some(auth) = policy.auth.as_ref() else {
            return;
        };
        let Some(authenticator) = auth
            .auth_type
            .as_deref()
            .and_then(|auth_type| self.authenticators.get(auth_type))
        else {
            return;
        };
        authenticator.inject(auth, invocation.request_mut());
        debug!(request_id = %invocation.request().request_id(), "credentials injected");
    }
}

#[async_trait]
impl InboundFilter for AuthFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Auth
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        self.check(invocation)?;
        chain.filter(invocation).await
    }
}
