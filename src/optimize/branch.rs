//! Branch simplification.
//!
//! An `If` collapses -- one arm dropped, or the whole statement removed
//! -- only when the eliminated bodies are observationally empty: no
//! `GlobalStore`, no `AtomicUpdate`, and no `LocalStore` observed past
//! the branch. Interior statements are never spliced or hoisted
//! elsewhere; a body is deleted wholesale or kept in full. A
//! `RangeFor` whose body is observationally empty falls under the same
//! rule (its bounds are pure).
//!
//! One rewrite per analysis round: every action strictly shrinks the
//! tree, and the next round's fresh usage map sees whatever the
//! rewrite unshadowed.

use crate::analysis::{StmtPath, UsageMap};
use crate::ir::{Kernel, Stmt};

pub(crate) fn run(kernel: &mut Kernel) -> bool {
    let mut changed = false;
    loop {
        let usage = UsageMap::analyze(kernel);
        if !apply_one(&mut kernel.body, &StmtPath(Vec::new()), &usage) {
            if changed {
                log::debug!("branch: kernel `{}` simplified", kernel.name);
            }
            return changed;
        }
        changed = true;
    }
}

/// Apply the first available simplification, innermost first. Returns
/// whether anything changed; the caller re-analyzes before the next
/// attempt.
fn apply_one(body: &mut Vec<Stmt>, prefix: &StmtPath, usage: &UsageMap) -> bool {
    for index in 0..body.len() {
        let path = prefix.child(index);
        match &mut body[index] {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                if apply_one(then_body, &path.child(0), usage)
                    || apply_one(else_body, &path.child(1), usage)
                {
                    return true;
                }
                let then_erasable = erasable(then_body, &path.child(0), usage);
                let else_erasable = erasable(else_body, &path.child(1), usage);
                if then_erasable && else_erasable {
                    body.remove(index);
                    return true;
                }
                if else_erasable && !else_body.is_empty() {
                    else_body.clear();
                    return true;
                }
                if then_erasable && !then_body.is_empty() {
                    then_body.clear();
                    return true;
                }
            }
            Stmt::RangeFor { body: inner, .. } => {
                if apply_one(inner, &path.child(0), usage) {
                    return true;
                }
                if erasable(inner, &path.child(0), usage) {
                    body.remove(index);
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Whether deleting the whole body is observationally equivalent to
/// keeping it. Conservative: anything in doubt keeps the body.
fn erasable(body: &[Stmt], prefix: &StmtPath, usage: &UsageMap) -> bool {
    body.iter().enumerate().all(|(index, stmt)| {
        let path = prefix.child(index);
        match stmt {
            // Scoped to this body; its uses are judged where they occur.
            Stmt::LocalDecl { .. } => true,
            Stmt::LocalStore { .. } => usage
                .store_at(&path)
                .is_some_and(|record| record.reads == 0 && !record.lane_shared),
            Stmt::GlobalStore { .. } => false,
            // Deleting an atomic changes the invocation count at its
            // target, observable whenever the target is shared.
            Stmt::AtomicUpdate { .. } => false,
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                erasable(then_body, &path.child(0), usage)
                    && erasable(else_body, &path.child(1), usage)
            }
            Stmt::RangeFor { body, .. } => erasable(body, &path.child(0), usage),
        }
    })
}

