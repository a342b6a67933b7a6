//! Def-use tracking for kernel-local variables.
//!
//! For every write to a local the tracker records which reads observe
//! that particular write: reads occurring after it and before the next
//! write on the same control-flow path. Branch arms are tracked
//! independently and their open writes union at the join; a `RangeFor`
//! joins its body with the zero-iteration path. Writes that land on a
//! variable declared outside an enclosing `RangeFor` are flagged
//! `lane_shared` -- any concurrent lane may observe them, so they are
//! treated as read.
//!
//! The map is recomputed before each pass round and never survives a
//! mutation of the tree.

use crate::ir::{Expr, Kernel, Stmt, Target};
use std::collections::{BTreeSet, HashMap};

// ─── Statement identity ───────────────────────────────────────────

/// Identity of a statement inside a kernel body tree: alternating
/// statement indices and body selectors (`If`: 0 = then, 1 = else;
/// `RangeFor`: 0), ending at a statement index. Ordering is document
/// order; passes delete in descending order so earlier paths stay
/// valid.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StmtPath(pub Vec<usize>);

impl StmtPath {
    pub(crate) fn child(&self, index: usize) -> StmtPath {
        let mut v = self.0.clone();
        v.push(index);
        StmtPath(v)
    }

    pub fn starts_with(&self, prefix: &StmtPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

/// Resolve a path to its containing block and final index.
pub(crate) fn locate_block<'a>(
    body: &'a mut Vec<Stmt>,
    path: &[usize],
) -> (&'a mut Vec<Stmt>, usize) {
    if path.len() == 1 {
        return (body, path[0]);
    }
    let inner = match &mut body[path[0]] {
        Stmt::If {
            then_body,
            else_body,
            ..
        } => {
            if path[1] == 0 {
                then_body
            } else {
                else_body
            }
        }
        Stmt::RangeFor { body, .. } => body,
        other => unreachable!("path descends into non-compound statement {:?}", other),
    };
    locate_block(inner, &path[2..])
}

// ─── Records ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    /// Plain `LocalStore`; eliminable when unobserved.
    Store,
    /// The target mutation of an `AtomicUpdate`; never eliminable.
    AtomicTarget,
    /// The binding of an atomic's returned pre-update value. The
    /// binding may be dropped when unobserved; the node survives.
    AtomicResult,
    /// The implicit per-iteration binding of a `RangeFor` variable.
    LoopVar,
}

#[derive(Clone, Debug)]
pub struct WriteRecord {
    pub var: String,
    pub path: StmtPath,
    pub kind: WriteKind,
    /// Number of reads that observe this particular write.
    pub reads: usize,
    /// Write lands on a variable declared outside an enclosing
    /// `RangeFor`: concurrent lanes may observe it regardless of what
    /// this lane's control flow does next.
    pub lane_shared: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VarStats {
    pub reads: usize,
    pub stores: usize,
    pub atomic_targets: usize,
    pub atomic_results: usize,
}

/// Usage map of one kernel body: every write with its observing-read
/// count, per-variable totals, and the declaration sites.
pub struct UsageMap {
    pub writes: Vec<WriteRecord>,
    pub vars: HashMap<String, VarStats>,
    pub decls: Vec<(String, StmtPath)>,
    store_index: HashMap<StmtPath, usize>,
}

impl UsageMap {
    pub fn analyze(kernel: &Kernel) -> UsageMap {
        let mut walker = Walker::default();
        walker.walk_block(kernel.body(), &StmtPath(Vec::new()));
        let mut store_index = HashMap::new();
        for (id, record) in walker.writes.iter().enumerate() {
            if record.kind == WriteKind::Store {
                store_index.insert(record.path.clone(), id);
            }
        }
        UsageMap {
            writes: walker.writes,
            vars: walker.vars,
            decls: walker.decls,
            store_index,
        }
    }

    /// The `Store`-kind record at the given path, if any.
    pub fn store_at(&self, path: &StmtPath) -> Option<&WriteRecord> {
        self.store_index.get(path).map(|&id| &self.writes[id])
    }

    pub fn stats(&self, var: &str) -> VarStats {
        self.vars.get(var).copied().unwrap_or_default()
    }
}

// ─── Walker ───────────────────────────────────────────────────────

#[derive(Default)]
struct Walker {
    writes: Vec<WriteRecord>,
    vars: HashMap<String, VarStats>,
    decls: Vec<(String, StmtPath)>,
    /// Open writes per variable: those a read at the current point
    /// would observe.
    open: HashMap<String, BTreeSet<usize>>,
    /// Loop-nesting depth at declaration, per visible variable.
    decl_depth: HashMap<String, usize>,
    loop_depth: usize,
}

impl Walker {
    fn walk_block(&mut self, body: &[Stmt], prefix: &StmtPath) {
        let mut frame_names: Vec<String> = Vec::new();
        for (index, stmt) in body.iter().enumerate() {
            let path = prefix.child(index);
            match stmt {
                Stmt::LocalDecl { name, .. } => {
                    self.declare(name, &mut frame_names);
                    self.decls.push((name.clone(), path));
                }
                Stmt::LocalStore { name, value } => {
                    self.visit_expr(value);
                    self.record_write(name, path, WriteKind::Store);
                }
                Stmt::GlobalStore { addr, value } => {
                    self.visit_expr(addr);
                    self.visit_expr(value);
                }
                Stmt::AtomicUpdate {
                    target,
                    operand,
                    binding,
                    ..
                } => {
                    self.visit_expr(operand);
                    match target {
                        Target::Local(name) => {
                            // The atomic observes the current value of its
                            // target before writing it: a read, then a
                            // non-eliminable write.
                            self.visit_read(name);
                            self.vars.entry(name.clone()).or_default().atomic_targets += 1;
                            self.record_write(name, path.clone(), WriteKind::AtomicTarget);
                        }
                        Target::Global(addr) => self.visit_expr(addr),
                    }
                    if let Some(name) = binding {
                        self.vars.entry(name.clone()).or_default().atomic_results += 1;
                        self.record_write(name, path, WriteKind::AtomicResult);
                    }
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.visit_expr(cond);
                    let before = self.open.clone();
                    self.walk_block(then_body, &path.child(0));
                    let after_then = std::mem::replace(&mut self.open, before);
                    self.walk_block(else_body, &path.child(1));
                    self.merge_open(after_then);
                }
                Stmt::RangeFor { var, lo, hi, body } => {
                    self.visit_expr(lo);
                    self.visit_expr(hi);
                    // The loop may run zero times, so the body joins
                    // with the fall-through path like a branch arm.
                    let before = self.open.clone();
                    self.walk_loop_body(var, body, &path.child(0));
                    let after_body = std::mem::replace(&mut self.open, before);
                    self.merge_open(after_body);
                }
            }
        }
        self.leave_frame(frame_names);
    }

    fn walk_loop_body(&mut self, var: &str, body: &[Stmt], prefix: &StmtPath) {
        self.loop_depth += 1;
        let mut loop_frame = Vec::new();
        self.declare(var, &mut loop_frame);
        self.record_write(var, prefix.clone(), WriteKind::LoopVar);
        self.walk_block(body, prefix);
        self.leave_frame(loop_frame);
        self.loop_depth -= 1;
    }

    fn declare(&mut self, name: &str, frame_names: &mut Vec<String>) {
        self.vars.entry(name.to_string()).or_default();
        self.decl_depth.insert(name.to_string(), self.loop_depth);
        // A fresh declaration opens with only its zero-init in scope.
        self.open.insert(name.to_string(), BTreeSet::new());
        frame_names.push(name.to_string());
    }

    fn leave_frame(&mut self, frame_names: Vec<String>) {
        for name in frame_names {
            self.open.remove(&name);
            self.decl_depth.remove(&name);
        }
    }

    fn record_write(&mut self, var: &str, path: StmtPath, kind: WriteKind) {
        let lane_shared = self
            .decl_depth
            .get(var)
            .is_some_and(|&depth| depth < self.loop_depth);
        let id = self.writes.len();
        self.writes.push(WriteRecord {
            var: var.to_string(),
            path,
            kind,
            reads: 0,
            lane_shared,
        });
        if kind == WriteKind::Store {
            self.vars.entry(var.to_string()).or_default().stores += 1;
        }
        self.open.insert(var.to_string(), BTreeSet::from([id]));
    }

    fn visit_read(&mut self, name: &str) {
        self.vars.entry(name.to_string()).or_default().reads += 1;
        if let Some(open) = self.open.get(name) {
            for &id in open {
                self.writes[id].reads += 1;
            }
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Const(_) => {}
            Expr::LocalLoad(name) => self.visit_read(name),
            Expr::GlobalLoad(addr) => self.visit_expr(addr),
            Expr::Binary { lhs, rhs, .. } => {
                self.visit_expr(lhs);
                self.visit_expr(rhs);
            }
        }
    }

    fn merge_open(&mut self, other: HashMap<String, BTreeSet<usize>>) {
        for (name, ids) in other {
            self.open.entry(name).or_default().extend(ids);
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
