//! Statement-level IR for data-parallel numeric kernels.
//!
//! A kernel body is a tree of statements: bodies nest inside `If` and
//! `RangeFor`, and each `RangeFor` body is instantiated once per index,
//! with iterations eligible to run concurrently across lanes. Pure
//! computation lives in `Expr` trees; anything that touches memory is a
//! statement. `AtomicUpdate` is the one node with two outputs -- a
//! committed side effect on its target and the returned pre-update
//! value -- and it is kept as a single statement so no pass can split
//! or reorder the two.

pub mod builder;
mod validate;

pub use builder::KernelBuilder;
pub use validate::MalformedIr;

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Scalars ──────────────────────────────────────────────────────

/// Declared element type of a variable or of a kernel's global memory.
///
/// `Int` is a 64-bit signed integer, `Float` is IEEE f64.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarTy {
    Int,
    Float,
}

impl fmt::Display for ScalarTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarTy::Int => write!(f, "int"),
            ScalarTy::Float => write!(f, "float"),
        }
    }
}

/// A runtime scalar value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn ty(&self) -> ScalarTy {
        match self {
            Value::Int(_) => ScalarTy::Int,
            Value::Float(_) => ScalarTy::Float,
        }
    }

    /// Zero of the given type (the initial value of every declared local
    /// and every global memory cell).
    pub fn zero(ty: ScalarTy) -> Value {
        match ty {
            ScalarTy::Int => Value::Int(0),
            ScalarTy::Float => Value::Float(0.0),
        }
    }

    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
        }
    }
}

// ─── Operators ────────────────────────────────────────────────────

/// Binary operator usable inside expression trees.
///
/// Comparisons yield `Int` 0/1; arithmetic yields the operand type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            // rendered in call form, not infix
            BinOp::Min => "min",
            BinOp::Max => "max",
        }
    }
}

/// Update operator of an `AtomicUpdate`. All are commutative and
/// associative, so concurrent lanes may commit in any order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomicOp {
    Add,
    Min,
    Max,
}

impl AtomicOp {
    /// The plain binary operator a demoted atomic computes with.
    pub fn as_binop(&self) -> BinOp {
        match self {
            AtomicOp::Add => BinOp::Add,
            AtomicOp::Min => BinOp::Min,
            AtomicOp::Max => BinOp::Max,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AtomicOp::Add => "atomic_add",
            AtomicOp::Min => "atomic_min",
            AtomicOp::Max => "atomic_max",
        }
    }
}

// ─── Expressions ──────────────────────────────────────────────────

/// A pure computation. Reads of locals and of global memory are
/// expression nodes; every write is a statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Value),
    /// Read of a lane-private (or kernel-scope) scalar.
    LocalLoad(String),
    /// Read of a global memory cell at the given `Int` address.
    GlobalLoad(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn int(v: i64) -> Expr {
        Expr::Const(Value::Int(v))
    }

    pub fn float(v: f64) -> Expr {
        Expr::Const(Value::Float(v))
    }

    pub fn local(name: impl Into<String>) -> Expr {
        Expr::LocalLoad(name.into())
    }

    pub fn global(addr: Expr) -> Expr {
        Expr::GlobalLoad(Box::new(addr))
    }

    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Add, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Mul, lhs, rhs)
    }

    pub fn gt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Gt, lhs, rhs)
    }

    /// Whether the expression reads the named local anywhere.
    pub(crate) fn reads_local(&self, name: &str) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::LocalLoad(n) => n == name,
            Expr::GlobalLoad(addr) => addr.reads_local(name),
            Expr::Binary { lhs, rhs, .. } => lhs.reads_local(name) || rhs.reads_local(name),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{}", v),
            Expr::LocalLoad(name) => write!(f, "{}", name),
            Expr::GlobalLoad(addr) => write!(f, "global[{}]", addr),
            Expr::Binary { op, lhs, rhs } => {
                if matches!(op, BinOp::Min | BinOp::Max) {
                    write!(f, "{}({}, {})", op.symbol(), lhs, rhs)
                } else {
                    write!(f, "({} {} {})", lhs, op.symbol(), rhs)
                }
            }
        }
    }
}

/// Target of an `AtomicUpdate`: a named local or a global memory cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Local(String),
    Global(Expr),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local(name) => write!(f, "{}", name),
            Target::Global(addr) => write!(f, "global[{}]", addr),
        }
    }
}

// ─── Statements ───────────────────────────────────────────────────

/// A single IR statement. Bodies of `If` and `RangeFor` nest, so a
/// kernel body forms a tree. Within one lane, statements execute in
/// the order they appear in their body; `RangeFor` iterations carry no
/// order between each other.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Declares a scalar, zero-initialized, scoped to the enclosing body.
    LocalDecl { name: String, ty: ScalarTy },
    LocalStore { name: String, value: Expr },
    GlobalStore { addr: Expr, value: Expr },
    /// Atomically reads `target`, writes back `current op operand`, and
    /// binds the pre-update value to `binding` (when present). The node
    /// survives every pass -- verbatim or demoted -- even if `binding` is
    /// unused or absent.
    AtomicUpdate {
        target: Target,
        op: AtomicOp,
        operand: Expr,
        binding: Option<String>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    /// Executes `body` once per integer in `[lo, hi)`. Iterations are
    /// eligible for concurrent execution; `var` is an implicitly
    /// declared `Int` local scoped to the body, one instance per lane.
    RangeFor {
        var: String,
        lo: Expr,
        hi: Expr,
        body: Vec<Stmt>,
    },
}

/// Count of `AtomicUpdate` nodes in a body, recursively. The optimizer
/// driver compares this around every pass: the count may only drop by
/// the number of demotions performed.
pub fn count_atomics(body: &[Stmt]) -> usize {
    body.iter()
        .map(|stmt| match stmt {
            Stmt::AtomicUpdate { .. } => 1,
            Stmt::If {
                then_body,
                else_body,
                ..
            } => count_atomics(then_body) + count_atomics(else_body),
            Stmt::RangeFor { body, .. } => count_atomics(body),
            _ => 0,
        })
        .sum()
}

// ─── Kernel ───────────────────────────────────────────────────────

/// A validated kernel: a named statement tree plus the element type of
/// the global memory it addresses. Construction validates the tree; a
/// `Kernel` in hand is well-formed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub name: String,
    /// Element type of every global memory cell this kernel addresses.
    pub global_ty: ScalarTy,
    pub(crate) body: Vec<Stmt>,
}

impl Kernel {
    pub fn new(
        name: impl Into<String>,
        global_ty: ScalarTy,
        body: Vec<Stmt>,
    ) -> Result<Kernel, MalformedIr> {
        let kernel = Kernel {
            name: name.into(),
            global_ty,
            body,
        };
        validate::validate(&kernel)?;
        Ok(kernel)
    }

    pub fn body(&self) -> &[Stmt] {
        &self.body
    }

    pub fn atomic_count(&self) -> usize {
        count_atomics(&self.body)
    }

    /// Content fingerprint of the printed IR. Stable across clones,
    /// changes whenever a pass changes the tree; the optimizer uses it
    /// for fixpoint detection and embedders may use it as a cache key.
    pub fn fingerprint(&self) -> blake3::Hash {
        blake3::hash(self.to_string().as_bytes())
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kernel {}: {} {{", self.name, self.global_ty)?;
        fmt_block(f, &self.body, 1)?;
        write!(f, "}}")
    }
}

fn fmt_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], depth: usize) -> fmt::Result {
    let pad = "    ".repeat(depth);
    for stmt in body {
        match stmt {
            Stmt::LocalDecl { name, ty } => writeln!(f, "{}local {}: {}", pad, name, ty)?,
            Stmt::LocalStore { name, value } => writeln!(f, "{}{} = {}", pad, name, value)?,
            Stmt::GlobalStore { addr, value } => {
                writeln!(f, "{}global[{}] = {}", pad, addr, value)?
            }
            Stmt::AtomicUpdate {
                target,
                op,
                operand,
                binding,
            } => match binding {
                Some(name) => {
                    writeln!(f, "{}{} = {}({}, {})", pad, name, op.name(), target, operand)?
                }
                None => writeln!(f, "{}{}({}, {})", pad, op.name(), target, operand)?,
            },
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                writeln!(f, "{}if {} {{", pad, cond)?;
                fmt_block(f, then_body, depth + 1)?;
                if else_body.is_empty() {
                    writeln!(f, "{}}}", pad)?;
                } else {
                    writeln!(f, "{}}} else {{", pad)?;
                    fmt_block(f, else_body, depth + 1)?;
                    writeln!(f, "{}}}", pad)?;
                }
            }
            Stmt::RangeFor { var, lo, hi, body } => {
                writeln!(f, "{}for {} in {}..{} {{", pad, var, lo, hi)?;
                fmt_block(f, body, depth + 1)?;
                writeln!(f, "{}}}", pad)?;
            }
        }
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────
