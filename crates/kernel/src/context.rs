use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use control_plane::{GovernanceConfig, PolicySupervisor};

use crate::function::FunctionRegistry;
use crate::tag::TagMatcherRegistry;

/// Whether this instance accepts traffic.
#[derive(Debug, Default)]
pub struct Readiness {
    ready: AtomicBool,
}

impl Readiness {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

/// Shared, read-only collaborators every invocation is built from.
#[derive(Clone)]
pub struct GovernanceContext {
    pub config: Arc<GovernanceConfig>,
    pub supervisor: Arc<dyn PolicySupervisor>,
    pub functions: Arc<FunctionRegistry>,
    pub matchers: Arc<TagMatcherRegistry>,
    pub readiness: Arc<Readiness>,
}

impl GovernanceContext {
    pub fn new(config: GovernanceConfig, supervisor: Arc<dyn PolicySupervisor>) -> Self {
        Self {
            config: Arc::new(config),
            supervisor,
            functions: Arc::new(FunctionRegistry::new()),
            matchers: Arc::new(TagMatcherRegistry::new()),
            readiness: Arc::new(Readiness::default()),
        }
    }
}
