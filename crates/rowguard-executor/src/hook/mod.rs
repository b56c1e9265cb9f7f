//! Run-strategy hook
//!
//! Installed strategies form a stack; the top one runs statements.
//! Installing returns a [`HookHandle`] that remembers what was active
//! before. Uninstalling removes exactly the handle's own entry, so modules
//! may be unloaded in any order.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use rowguard_common::error::Result;
use rowguard_common::types::ScanDirection;

use crate::engine::StandardRun;
use crate::executor::{RunReport, StatementContext, TupleSink, TupleSource};

/// Strategy for running one statement's rows from source to sink
pub trait RunStrategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        ctx: &StatementContext,
        source: &mut dyn TupleSource,
        sink: &mut dyn TupleSink,
        limit: u64,
        direction: ScanDirection,
    ) -> Result<RunReport>;
}

/// Proof of installation; carries the strategy that was displaced
#[must_use = "dropping the handle leaves the strategy installed for good"]
pub struct HookHandle {
    installed: Arc<dyn RunStrategy>,
    previous: Option<Arc<dyn RunStrategy>>,
}

impl HookHandle {
    /// Strategy active before this installation
    pub fn previous(&self) -> Option<&Arc<dyn RunStrategy>> {
        self.previous.as_ref()
    }

    pub fn installed(&self) -> &Arc<dyn RunStrategy> {
        &self.installed
    }
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookHandle")
            .field("installed", &self.installed.name())
            .field("previous", &self.previous.as_ref().map(|p| p.name()))
            .finish()
    }
}

/// Holder of the installed run strategies
#[derive(Default)]
pub struct HookRegistry {
    stack: RwLock<Vec<Arc<dyn RunStrategy>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `strategy` the active one
    pub fn install(&self, strategy: Arc<dyn RunStrategy>) -> HookHandle {
        let mut stack = self.stack.write();
        let previous = stack.last().cloned();
        stack.push(Arc::clone(&strategy));
        info!(
            strategy = strategy.name(),
            previous = previous.as_ref().map(|p| p.name()),
            "run hook installed"
        );
        HookHandle {
            installed: strategy,
            previous,
        }
    }

    /// Remove the strategy `handle` installed.
    ///
    /// Strategies installed after it stay active. Returns false when the
    /// strategy is no longer registered.
    pub fn uninstall(&self, handle: HookHandle) -> bool {
        let mut stack = self.stack.write();
        let Some(pos) = stack
            .iter()
            .rposition(|active| Arc::ptr_eq(active, &handle.installed))
        else {
            warn!(strategy = handle.installed.name(), "run hook not registered");
            return false;
        };

        if pos + 1 != stack.len() {
            debug!(
                strategy = handle.installed.name(),
                above = stack.len() - pos - 1,
                "uninstalling a run hook below the top"
            );
        }
        stack.remove(pos);
        info!(strategy = handle.installed.name(), "run hook uninstalled");
        true
    }

    pub fn is_installed(&self) -> bool {
        !self.stack.read().is_empty()
    }

    /// Active strategy, or the standard run when none is installed
    pub fn current(&self) -> Arc<dyn RunStrategy> {
        if let Some(strategy) = self.stack.read().last() {
            return Arc::clone(strategy);
        }
        Arc::new(StandardRun)
    }

    /// Run a statement with the active strategy
    pub fn run(
        &self,
        ctx: &StatementContext,
        source: &mut dyn TupleSource,
        sink: &mut dyn TupleSink,
        limit: u64,
        direction: ScanDirection,
    ) -> Result<RunReport> {
        let strategy = self.current();
        strategy.execute(ctx, source, sink, limit, direction)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("current", &self.stack.read().last().map(|s| s.name()))
            .field("depth", &self.stack.read().len())
            .finish()
    }
}
