//! Compensating workflow for multi-step commands.
//!
//! Each step that commits durable state registers the [`Compensation`] that
//! undoes it. When a later step fails, [`Saga::abort`] runs the registered
//! compensations in reverse order and hands back the error that caused the
//! abort. Compensations are best-effort and idempotent: their own failures
//! are logged and never replace the original error.

use lbcp_core::AccountId;
use lbcp_store::{Store, StoreError};

use crate::error::ControlError;

/// An undo action for a committed workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    /// Delete the load balancer aggregate.
    DeleteLoadBalancer,
    /// Detach servo agents and clear the security group reference.
    UnlinkReferences,
}

/// A workflow over one load balancer with its pending compensations.
pub struct Saga<'a, S: Store> {
    store: &'a S,
    account_id: AccountId,
    name: String,
    compensations: Vec<Compensation>,
}

impl<'a, S: Store> Saga<'a, S> {
    /// Start a workflow for the named balancer.
    #[must_use]
    pub fn begin(store: &'a S, account_id: AccountId, name: impl Into<String>) -> Self {
        Self {
            store,
            account_id,
            name: name.into(),
            compensations: Vec::new(),
        }
    }

    /// Register the undo action for a step that has just committed.
    pub fn on_failure(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    /// Compensations registered so far, in step order.
    #[must_use]
    pub fn compensations(&self) -> &[Compensation] {
        &self.compensations
    }

    /// Finish the workflow, discarding its compensations.
    pub fn complete(self) {
        tracing::debug!(
            account_id = %self.account_id,
            name = %self.name,
            steps = self.compensations.len(),
            "Workflow completed"
        );
    }

    /// Undo every committed step in reverse order and return `cause`.
    #[must_use]
    pub fn abort(self, cause: ControlError) -> ControlError {
        tracing::warn!(
            account_id = %self.account_id,
            name = %self.name,
            error = %cause,
            "Rolling back workflow"
        );

        for compensation in self.compensations.iter().rev() {
            if let Err(e) = self.run(*compensation) {
                tracing::error!(
                    account_id = %self.account_id,
                    name = %self.name,
                    compensation = ?compensation,
                    error = %e,
                    "Rollback step failed"
                );
            }
        }

        cause
    }

    fn run(&self, compensation: Compensation) -> Result<(), StoreError> {
        let result = match compensation {
            Compensation::UnlinkReferences => {
                self.store.unlink_servos(&self.account_id, &self.name)?;
                self.store
                    .update_load_balancer(&self.account_id, &self.name, &mut |lb| {
                        lb.security_group = None;
                        Ok(())
                    })
                    .map(|_| ())
            }
            Compensation::DeleteLoadBalancer => {
                self.store.delete_load_balancer(&self.account_id, &self.name)
            }
        };

        match result {
            Err(StoreError::NotFound) => Ok(()),
            other => other,
        }
    }
}
