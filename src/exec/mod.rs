//! Parallel range executor.
//!
//! Walks the frozen statement tree, fanning `RangeFor` iterations out
//! across rayon worker threads -- one lane per index, run to completion,
//! no ordering between lanes. Global memory cells and local slots are
//! `AtomicU64`s holding the value bits: atomic updates go through a CAS
//! loop, so all updates to one address linearize and each lane's
//! returned pre-update value is its immediate predecessor in that
//! order. Plain accesses use relaxed loads and stores; racing them on a
//! shared address is a programmer error with unspecified interleaving,
//! never unsoundness.

use crate::ir::{AtomicOp, BinOp, Expr, Kernel, ScalarTy, Stmt, Target, Value};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ─── Errors ───────────────────────────────────────────────────────

/// Runtime fault surfaced verbatim to the caller. The kernel invocation
/// aborts on the first fault the runtime observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionError {
    OutOfRange { addr: i64, len: usize },
    DivisionByZero,
    MemoryTypeMismatch { kernel: ScalarTy, memory: ScalarTy },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::OutOfRange { addr, len } => {
                write!(f, "global address {} out of range (memory has {} cells)", addr, len)
            }
            ExecutionError::DivisionByZero => write!(f, "integer division by zero"),
            ExecutionError::MemoryTypeMismatch { kernel, memory } => write!(
                f,
                "kernel addresses {} cells but memory holds {}",
                kernel, memory
            ),
        }
    }
}

impl std::error::Error for ExecutionError {}

// ─── Value bits ───────────────────────────────────────────────────

fn encode(value: Value) -> u64 {
    match value {
        Value::Int(v) => v as u64,
        Value::Float(v) => v.to_bits(),
    }
}

fn decode(ty: ScalarTy, bits: u64) -> Value {
    match ty {
        ScalarTy::Int => Value::Int(bits as i64),
        ScalarTy::Float => Value::Float(f64::from_bits(bits)),
    }
}

/// CAS loop over a bit cell; returns the pre-update value. Relaxed
/// suffices: RMWs on one location always form a single modification
/// order.
fn atomic_rmw(cell: &AtomicU64, ty: ScalarTy, op: AtomicOp, operand: Value) -> Value {
    let result = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        Some(encode(apply_atomic(op, decode(ty, bits), operand)))
    });
    let (Ok(prev) | Err(prev)) = result;
    decode(ty, prev)
}

fn apply_atomic(op: AtomicOp, current: Value, operand: Value) -> Value {
    match (current, operand) {
        (Value::Int(a), Value::Int(b)) => Value::Int(match op {
            AtomicOp::Add => a.wrapping_add(b),
            AtomicOp::Min => a.min(b),
            AtomicOp::Max => a.max(b),
        }),
        (Value::Float(a), Value::Float(b)) => Value::Float(match op {
            AtomicOp::Add => a + b,
            AtomicOp::Min => a.min(b),
            AtomicOp::Max => a.max(b),
        }),
        _ => unreachable!("type error escaped validation"),
    }
}

fn eval_binop(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, ExecutionError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(match op {
            BinOp::Add => Value::Int(a.wrapping_add(b)),
            BinOp::Sub => Value::Int(a.wrapping_sub(b)),
            BinOp::Mul => Value::Int(a.wrapping_mul(b)),
            BinOp::Div => {
                if b == 0 {
                    return Err(ExecutionError::DivisionByZero);
                }
                Value::Int(a.wrapping_div(b))
            }
            BinOp::Min => Value::Int(a.min(b)),
            BinOp::Max => Value::Int(a.max(b)),
            BinOp::Eq => Value::Int((a == b) as i64),
            BinOp::Ne => Value::Int((a != b) as i64),
            BinOp::Lt => Value::Int((a < b) as i64),
            BinOp::Le => Value::Int((a <= b) as i64),
            BinOp::Gt => Value::Int((a > b) as i64),
            BinOp::Ge => Value::Int((a >= b) as i64),
        }),
        (Value::Float(a), Value::Float(b)) => Ok(match op {
            BinOp::Add => Value::Float(a + b),
            BinOp::Sub => Value::Float(a - b),
            BinOp::Mul => Value::Float(a * b),
            // IEEE semantics: division by zero yields an infinity.
            BinOp::Div => Value::Float(a / b),
            BinOp::Min => Value::Float(a.min(b)),
            BinOp::Max => Value::Float(a.max(b)),
            BinOp::Eq => Value::Int((a == b) as i64),
            BinOp::Ne => Value::Int((a != b) as i64),
            BinOp::Lt => Value::Int((a < b) as i64),
            BinOp::Le => Value::Int((a <= b) as i64),
            BinOp::Gt => Value::Int((a > b) as i64),
            BinOp::Ge => Value::Int((a >= b) as i64),
        }),
        _ => unreachable!("type error escaped validation"),
    }
}

fn expect_int(value: Value) -> i64 {
    match value {
        Value::Int(v) => v,
        Value::Float(_) => unreachable!("type error escaped validation"),
    }
}

// ─── Global memory ────────────────────────────────────────────────

/// Flat, typed, zero-initialized cell array -- the only resource shared
/// across lanes. Interior-mutable, so kernels launch against `&self`.
pub struct GlobalMemory {
    ty: ScalarTy,
    cells: Vec<AtomicU64>,
}

impl GlobalMemory {
    pub fn new(ty: ScalarTy, len: usize) -> GlobalMemory {
        // Zero bits decode to Int 0 and Float 0.0 alike.
        GlobalMemory {
            ty,
            cells: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn ty(&self) -> ScalarTy {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Host-side accessor; panics on an out-of-range index.
    pub fn get(&self, index: usize) -> Value {
        decode(self.ty, self.cells[index].load(Ordering::Relaxed))
    }

    /// Host-side accessor; panics on an out-of-range index or a value
    /// of the wrong type.
    pub fn set(&self, index: usize, value: Value) {
        assert_eq!(value.ty(), self.ty, "value type does not match memory");
        self.cells[index].store(encode(value), Ordering::Relaxed);
    }

    pub fn to_vec(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    fn cell(&self, addr: i64) -> Result<&AtomicU64, ExecutionError> {
        usize::try_from(addr)
            .ok()
            .and_then(|index| self.cells.get(index))
            .ok_or(ExecutionError::OutOfRange {
                addr,
                len: self.cells.len(),
            })
    }

    fn load(&self, addr: i64) -> Result<Value, ExecutionError> {
        Ok(decode(self.ty, self.cell(addr)?.load(Ordering::Relaxed)))
    }

    fn store(&self, addr: i64, value: Value) -> Result<(), ExecutionError> {
        self.cell(addr)?.store(encode(value), Ordering::Relaxed);
        Ok(())
    }

    fn update(&self, addr: i64, op: AtomicOp, operand: Value) -> Result<Value, ExecutionError> {
        Ok(atomic_rmw(self.cell(addr)?, self.ty, op, operand))
    }
}

// ─── Lane frames ──────────────────────────────────────────────────

struct LocalCell {
    ty: ScalarTy,
    bits: AtomicU64,
}

impl LocalCell {
    fn new(ty: ScalarTy) -> LocalCell {
        LocalCell {
            ty,
            bits: AtomicU64::new(0),
        }
    }

    fn load(&self) -> Value {
        decode(self.ty, self.bits.load(Ordering::Relaxed))
    }

    fn store(&self, value: Value) {
        self.bits.store(encode(value), Ordering::Relaxed);
    }

    fn rmw(&self, op: AtomicOp, operand: Value) -> Value {
        atomic_rmw(&self.bits, self.ty, op, operand)
    }
}

/// One lexical scope of locals. Lane-shared locals (declared outside a
/// `RangeFor`, touched inside) are reached through `parent` chains that
/// cross the fan-out, which is why every slot is an atomic cell.
struct Frame<'a> {
    parent: Option<&'a Frame<'a>>,
    slots: HashMap<String, LocalCell>,
}

impl<'a> Frame<'a> {
    fn root() -> Frame<'static> {
        Frame {
            parent: None,
            slots: HashMap::new(),
        }
    }

    fn child(parent: &'a Frame<'a>) -> Frame<'a> {
        Frame {
            parent: Some(parent),
            slots: HashMap::new(),
        }
    }

    fn declare(&mut self, name: &str, ty: ScalarTy) {
        self.slots.insert(name.to_string(), LocalCell::new(ty));
    }

    fn declare_init(&mut self, name: &str, value: Value) {
        let cell = LocalCell::new(value.ty());
        cell.store(value);
        self.slots.insert(name.to_string(), cell);
    }

    fn cell(&self, name: &str) -> &LocalCell {
        let mut frame = self;
        loop {
            if let Some(cell) = frame.slots.get(name) {
                return cell;
            }
            match frame.parent {
                Some(parent) => frame = parent,
                None => unreachable!("undeclared local escaped validation: `{}`", name),
            }
        }
    }
}

// ─── Interpreter ──────────────────────────────────────────────────

struct Interp<'m> {
    mem: &'m GlobalMemory,
    parallel: bool,
}

impl<'m> Interp<'m> {
    fn exec_block(&self, body: &[Stmt], parent: &Frame<'_>) -> Result<(), ExecutionError> {
        let mut frame = Frame::child(parent);
        for stmt in body {
            match stmt {
                Stmt::LocalDecl { name, ty } => frame.declare(name, *ty),
                Stmt::LocalStore { name, value } => {
                    let value = self.eval(value, &frame)?;
                    frame.cell(name).store(value);
                }
                Stmt::GlobalStore { addr, value } => {
                    let addr = expect_int(self.eval(addr, &frame)?);
                    let value = self.eval(value, &frame)?;
                    self.mem.store(addr, value)?;
                }
                Stmt::AtomicUpdate {
                    target,
                    op,
                    operand,
                    binding,
                } => {
                    let operand = self.eval(operand, &frame)?;
                    let prev = match target {
                        Target::Local(name) => frame.cell(name).rmw(*op, operand),
                        Target::Global(addr) => {
                            let addr = expect_int(self.eval(addr, &frame)?);
                            self.mem.update(addr, *op, operand)?
                        }
                    };
                    if let Some(name) = binding {
                        frame.cell(name).store(prev);
                    }
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    if self.eval(cond, &frame)?.is_truthy() {
                        self.exec_block(then_body, &frame)?;
                    } else {
                        self.exec_block(else_body, &frame)?;
                    }
                }
                Stmt::RangeFor { var, lo, hi, body } => {
                    let lo = expect_int(self.eval(lo, &frame)?);
                    let hi = expect_int(self.eval(hi, &frame)?);
                    if self.parallel {
                        (lo..hi).into_par_iter().try_for_each(|i| {
                            let mut lane = Frame::child(&frame);
                            lane.declare_init(var, Value::Int(i));
                            self.exec_block(body, &lane)
                        })?;
                    } else {
                        for i in lo..hi {
                            let mut lane = Frame::child(&frame);
                            lane.declare_init(var, Value::Int(i));
                            self.exec_block(body, &lane)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, frame: &Frame<'_>) -> Result<Value, ExecutionError> {
        match expr {
            Expr::Const(v) => Ok(*v),
            Expr::LocalLoad(name) => Ok(frame.cell(name).load()),
            Expr::GlobalLoad(addr) => {
                let addr = expect_int(self.eval(addr, frame)?);
                self.mem.load(addr)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                eval_binop(*op, lhs, rhs)
            }
        }
    }
}

// ─── Compiled kernel ──────────────────────────────────────────────

/// A frozen, optimized kernel ready to launch. The IR behind it is no
/// longer mutated by anyone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompiledKernel {
    kernel: Kernel,
}

impl CompiledKernel {
    pub(crate) fn new(kernel: Kernel) -> CompiledKernel {
        CompiledKernel { kernel }
    }

    pub fn ir(&self) -> &Kernel {
        &self.kernel
    }

    pub fn name(&self) -> &str {
        &self.kernel.name
    }

    pub fn fingerprint(&self) -> blake3::Hash {
        self.kernel.fingerprint()
    }

    /// Run with `RangeFor` iterations fanned out across rayon lanes.
    pub fn launch(&self, mem: &GlobalMemory) -> Result<(), ExecutionError> {
        self.run(mem, true)
    }

    /// Run every iteration on the calling thread, in index order. Used
    /// by differential tests; the contract promises no more than
    /// `launch` does.
    pub fn launch_serial(&self, mem: &GlobalMemory) -> Result<(), ExecutionError> {
        self.run(mem, false)
    }

    fn run(&self, mem: &GlobalMemory, parallel: bool) -> Result<(), ExecutionError> {
        if mem.ty() != self.kernel.global_ty {
            return Err(ExecutionError::MemoryTypeMismatch {
                kernel: self.kernel.global_ty,
                memory: mem.ty(),
            });
        }
        let interp = Interp { mem, parallel };
        let root = Frame::root();
        interp.exec_block(self.kernel.body(), &root)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
