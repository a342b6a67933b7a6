//! lanir -- statement-level IR and optimizer for data-parallel numeric
//! kernels.
//!
//! A kernel is a tree of statements whose `RangeFor` bodies run once
//! per index, concurrently across lanes. The optimizer's job is to be
//! aggressive about everything except atomics: an `AtomicUpdate` is
//! both a side effect and a value, and every pass here is built around
//! keeping those two halves together. Three passes are provided --
//! dead-store elimination, branch simplification, and demotion of
//! lane-private atomics to plain load-compute-store -- plus a rayon
//! executor implementing the linearizability contract the passes rely
//! on.
//!
//! ```
//! use lanir::{compile, Expr, GlobalMemory, KernelBuilder, OptConfig, ScalarTy, Target, Value};
//! use lanir::ir::AtomicOp;
//!
//! let n = 128;
//! let kernel = KernelBuilder::new("accumulate", ScalarTy::Int)
//!     .ranged("i", Expr::int(0), Expr::int(n), |b| {
//!         b.local("r", ScalarTy::Int);
//!         b.atomic_into("r", Target::Global(Expr::int(n)), AtomicOp::Add, Expr::int(42));
//!         b.global_store(Expr::local("i"), Expr::local("r"));
//!     })
//!     .finish()
//!     .unwrap();
//!
//! let compiled = compile(kernel, &OptConfig::default()).unwrap();
//! let mem = GlobalMemory::new(ScalarTy::Int, n as usize + 1);
//! compiled.launch(&mem).unwrap();
//! assert_eq!(mem.get(n as usize), Value::Int(128 * 42));
//! ```

pub mod analysis;
pub mod config;
pub mod exec;
pub mod ir;
pub mod optimize;

pub use config::OptConfig;
pub use exec::{CompiledKernel, ExecutionError, GlobalMemory};
pub use ir::{Expr, Kernel, KernelBuilder, MalformedIr, ScalarTy, Stmt, Target, Value};
pub use optimize::{optimize, InvariantViolation};

/// Optimize a validated kernel and freeze it for execution.
///
/// `InvariantViolation` indicates a defect in the pass pipeline itself
/// (an atomic vanished without being demoted); it cannot be provoked by
/// any well-formed kernel.
pub fn compile(
    mut kernel: Kernel,
    config: &OptConfig,
) -> Result<CompiledKernel, InvariantViolation> {
    optimize(&mut kernel, config)?;
    Ok(CompiledKernel::new(kernel))
}
