use async_trait::async_trait;
use control_plane::PermissionKind;

use super::{FilterChain, InboundFilter};
use crate::fault::{FaultType, GovernanceError};
use crate::invocation::Invocation;
use crate::pipeline::FilterKey;

/// Allow policies admit a call when at least one of them matches; deny
/// policies reject a call when any of them matches.
pub struct PermissionFilter;

impl PermissionFilter {
    fn check(invocation: &Invocation) -> Result<(), GovernanceError> {
        let policy = invocation.service().policy.clone();
        let permissions = policy.permissions();
        if let Some(denied) = permissions
            .iter()
            .filter(|permission| permission.kind == PermissionKind::Deny)
            .find(|permission| invocation.match_all(&permission.conditions))
        {
            return Err(invocation.reject(
                FaultType::PermissionDenied,
                format!("denied by permission {}", denied.id),
            ));
        }
        let mut allows = permissions
            .iter()
            .filter(|permission| permission.kind == PermissionKind::Allow)
            .peekable();
        if allows.peek().is_some() && !allows.any(|permission| invocation.match_all(&permission.conditions)) {
            return Err(invocation.reject(
                FaultType::PermissionDenied,
                "no permission allows this call",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl InboundFilter for PermissionFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Permission
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        Self::check(invocation)?;
        chain.filter(invocation).await
    }
}
