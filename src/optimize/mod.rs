//! Optimization pipeline for kernel IR.
//!
//! Dead-store elimination and branch simplification alternate until the
//! kernel fingerprint stops changing (each can unshadow work for the
//! other), then atomic demotion runs once -- demotion changes operation
//! shape, not store liveness, so nothing re-runs after it.
//!
//! Around every pass the driver counts `AtomicUpdate` nodes. A pass
//! that loses one without demoting it is a defect in the optimizer
//! itself, reported as `InvariantViolation`; the test suite asserts it
//! never fires.

mod branch;
mod dead_store;
mod demote;
#[cfg(test)]
mod tests;

use crate::config::OptConfig;
use crate::ir::Kernel;
use std::fmt;

/// Internal optimizer defect: a pass deleted an `AtomicUpdate` outright.
/// Not a user-facing condition -- a correct pass pipeline cannot produce
/// this.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    pub pass: &'static str,
    pub atomics_before: usize,
    pub atomics_after: usize,
    pub demoted: usize,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pass `{}` dropped atomic updates: {} before, {} after, {} demoted",
            self.pass, self.atomics_before, self.atomics_after, self.demoted
        )
    }
}

impl std::error::Error for InvariantViolation {}

/// Run the configured passes to fixpoint, in place.
pub fn optimize(kernel: &mut Kernel, config: &OptConfig) -> Result<(), InvariantViolation> {
    loop {
        let before = kernel.fingerprint();
        if config.dead_store_elimination {
            checked(kernel, "dead_store", dead_store::run)?;
        }
        if config.branch_simplification {
            checked(kernel, "branch", branch::run)?;
        }
        if kernel.fingerprint() == before {
            break;
        }
    }
    if config.demote_atomics {
        let atomics_before = kernel.atomic_count();
        let demoted = demote::run(kernel);
        let atomics_after = kernel.atomic_count();
        if atomics_after + demoted != atomics_before {
            return Err(InvariantViolation {
                pass: "demote",
                atomics_before,
                atomics_after,
                demoted,
            });
        }
    }
    log::debug!(
        "optimize: kernel `{}` settled at {} atomics",
        kernel.name,
        kernel.atomic_count()
    );
    Ok(())
}

/// Run one non-demoting pass and verify it preserved every atomic.
fn checked(
    kernel: &mut Kernel,
    pass: &'static str,
    run: fn(&mut Kernel) -> bool,
) -> Result<(), InvariantViolation> {
    let atomics_before = kernel.atomic_count();
    run(kernel);
    let atomics_after = kernel.atomic_count();
    if atomics_after != atomics_before {
        return Err(InvariantViolation {
            pass,
            atomics_before,
            atomics_after,
            demoted: 0,
        });
    }
    Ok(())
}
