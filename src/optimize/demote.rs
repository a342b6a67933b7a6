//! Atomic demotion: rewriting lane-private atomics into plain
//! load-compute-store sequences.
//!
//! A local target is lane-private exactly when no `RangeFor` boundary
//! lies between its declaration and the update: the declaring body and
//! the updating statement then belong to the same lane instance, so no
//! concurrent access to the target is possible. Locals cannot alias
//! global memory or be passed by reference in this IR, which makes the
//! structural check complete.
//!
//! The rewrite preserves the returned pre-update value exactly:
//!
//! ```text
//! r = atomic_add(t, e)   =>   r = t
//!                             t = (r + e)
//!
//! atomic_add(t, e)       =>   t = (t + e)
//! ```

use crate::ir::{Expr, Kernel, Stmt, Target};
use std::collections::HashSet;

pub(crate) fn run(kernel: &mut Kernel) -> usize {
    let mut scopes = Scopes::default();
    let demoted = demote_block(&mut kernel.body, &mut scopes);
    if demoted > 0 {
        log::debug!(
            "demote: kernel `{}`: {} atomics rewritten to plain stores",
            kernel.name,
            demoted
        );
    }
    demoted
}

/// Tracks, for every visible local, whether a `RangeFor` boundary has
/// been crossed since its declaration.
#[derive(Default)]
struct Scopes {
    frames: Vec<Frame>,
}

#[derive(Default)]
struct Frame {
    names: HashSet<String>,
    is_loop_body: bool,
}

impl Scopes {
    fn enter(&mut self, is_loop_body: bool) {
        self.frames.push(Frame {
            names: HashSet::new(),
            is_loop_body,
        });
    }

    fn exit(&mut self) {
        self.frames.pop();
    }

    fn declare(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.names.insert(name.to_string());
        }
    }

    /// Private iff the innermost frame chain from the declaration down
    /// to here crosses no loop-body boundary.
    fn lane_private(&self, name: &str) -> bool {
        for frame in self.frames.iter().rev() {
            if frame.names.contains(name) {
                return true;
            }
            if frame.is_loop_body {
                return false;
            }
        }
        false
    }
}

fn demote_block(body: &mut Vec<Stmt>, scopes: &mut Scopes) -> usize {
    let mut demoted = 0;
    let stmts = std::mem::take(body);
    scopes.enter(false);
    for mut stmt in stmts {
        match &mut stmt {
            Stmt::LocalDecl { name, .. } => scopes.declare(name),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                demoted += demote_block(then_body, scopes);
                demoted += demote_block(else_body, scopes);
            }
            Stmt::RangeFor { var, body, .. } => {
                scopes.enter(true);
                scopes.declare(var);
                demoted += demote_block(body, scopes);
                scopes.exit();
            }
            Stmt::AtomicUpdate {
                target: Target::Local(name),
                op,
                operand,
                binding,
            } if scopes.lane_private(name) && demotable_shape(name, operand, binding) => {
                demoted += 1;
                let name = name.clone();
                let compute = |pre: Expr, operand: Expr| Expr::bin(op.as_binop(), pre, operand);
                match binding.take() {
                    Some(r) => {
                        body.push(Stmt::LocalStore {
                            name: r.clone(),
                            value: Expr::local(name.clone()),
                        });
                        body.push(Stmt::LocalStore {
                            name,
                            value: compute(Expr::local(r), operand.clone()),
                        });
                    }
                    None => {
                        body.push(Stmt::LocalStore {
                            name: name.clone(),
                            value: compute(Expr::local(name), operand.clone()),
                        });
                    }
                }
                continue;
            }
            _ => {}
        }
        body.push(stmt);
    }
    scopes.exit();
    demoted
}

/// The demoted form writes the binding before evaluating the operand,
/// and writes the target after the binding. Two shapes would change
/// meaning under that ordering and stay atomic instead: an operand that
/// reads the binding variable, and a binding that is the target itself.
fn demotable_shape(target: &str, operand: &Expr, binding: &Option<String>) -> bool {
    match binding {
        Some(name) => name != target && !operand.reads_local(name),
        None => true,
    }
}
