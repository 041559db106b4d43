mod auth;
mod limit;
mod live;
mod permission;
mod ready;

pub use auth::{AuthFilter, Authenticator, TokenAuthenticator, TOKEN_AUTH};
pub use limit::{acquire_permits, ConcurrencyLimitFilter, LoadLimitFilter, RateLimitFilter};
pub use live::{CellFilter, FailoverFilter, UnitFilter};
pub use permission::PermissionFilter;
pub use ready::ReadyFilter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::fault::GovernanceError;
use crate::invocation::Invocation;
use crate::pipeline::FilterKey;

/// One step of the inbound chain. A filter either hands the invocation to
/// `chain` or returns an error that ends the call.
#[async_trait]
pub trait InboundFilter: Send + Sync {
    fn key(&self) -> FilterKey;

    async fn filter(
        &self,
        invocation: &mut Invocation,
        chain: FilterChain<'_>,
    ) -> Result<(), GovernanceError>;
}

/// Runs the business call once every filter passed.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, invocation: &mut Invocation) -> Result<(), GovernanceError>;
}

/// The remaining filters of a chain plus the terminal invoker.
#[derive(Clone, Copy)]
pub struct FilterChain<'a> {
    filters: &'a [Arc<dyn InboundFilter>],
    invoker: &'a dyn Invoker,
}

impl<'a> FilterChain<'a> {
    pub fn new(filters: &'a [Arc<dyn InboundFilter>], invoker: &'a dyn Invoker) -> Self {
        Self { filters, invoker }
    }

    pub async fn filter(self, invocation: &mut Invocation) -> Result<(), GovernanceError> {
        match self.filters.split_first() {
            Some((head, rest)) => {
                head.filter(
                    invocation,
                    FilterChain {
                        filters: rest,
                        invoker: self.invoker,
                    },
                )
                .await
            }
            None => self.invoker.invoke(invocation).await,
        }
    }
}
