use super::*;
use crate::config::OptConfig;
use crate::ir::{AtomicOp, Expr, Kernel, KernelBuilder, ScalarTy, Stmt, Target};

fn count_stores(body: &[Stmt]) -> usize {
    body.iter()
        .map(|stmt| match stmt {
            Stmt::LocalStore { .. } => 1,
            Stmt::If {
                then_body,
                else_body,
                ..
            } => count_stores(then_body) + count_stores(else_body),
            Stmt::RangeFor { body, .. } => count_stores(body),
            _ => 0,
        })
        .sum()
}

fn run_default(kernel: &mut Kernel) {
    optimize(kernel, &OptConfig::default()).expect("optimizer invariant violated");
}

// ── Dead store elimination ──

#[test]
fn removes_unread_store_and_decl() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("j", ScalarTy::Int)
        .store("j", Expr::int(1))
        .global_store(Expr::int(0), Expr::int(2))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(count_stores(kernel.body()), 0);
    assert_eq!(kernel.body().len(), 1);
    assert!(matches!(kernel.body()[0], Stmt::GlobalStore { .. }));
}

#[test]
fn keeps_store_observed_by_atomic_read() {
    // j = 7; r = atomic_add(j, 42); j = r; global[0] = j
    // The first store feeds the atomic's read; only read reachability
    // matters, not "is this the last write".
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("j", ScalarTy::Int)
        .local("r", ScalarTy::Int)
        .store("j", Expr::int(7))
        .atomic_into("r", Target::Local("j".into()), AtomicOp::Add, Expr::int(42))
        .store("j", Expr::local("r"))
        .global_store(Expr::int(0), Expr::local("j"))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    // Demotion rewrites the atomic, but both original stores survive.
    let printed = kernel.to_string();
    assert!(printed.contains("j = 7"));
    assert!(printed.contains("j = r"));
}

#[test]
fn clears_unused_binding_but_keeps_atomic() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("r", ScalarTy::Int)
        .atomic_into("r", Target::Global(Expr::int(0)), AtomicOp::Add, Expr::int(1))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 1);
    match &kernel.body()[0] {
        Stmt::AtomicUpdate { binding, .. } => assert!(binding.is_none()),
        other => panic!("expected the atomic to survive, got {:?}", other),
    }
    // The binding local became unreferenced and was dropped with it.
    assert_eq!(kernel.body().len(), 1);
}

#[test]
fn eliminates_store_chains_to_fixpoint() {
    // b feeds nothing; removing b's store unshadows a, which then dies.
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("a", ScalarTy::Int)
        .local("b", ScalarTy::Int)
        .store("a", Expr::int(1))
        .store("b", Expr::local("a"))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert!(kernel.body().is_empty());
}

#[test]
fn keeps_lane_shared_stores() {
    // A store to a variable declared outside the loop is observable by
    // other lanes; it must survive even with no reads in the tree.
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("shared", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(8), |b| {
            b.store("shared", Expr::local("i"));
        })
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(count_stores(kernel.body()), 1);
}

// ── Branch simplification ──

#[test]
fn removes_branch_with_no_observable_effect() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(8), |b| {
            b.branch(
                Expr::gt(Expr::local("i"), Expr::int(4)),
                |b| {
                    b.local("t", ScalarTy::Int);
                    b.store("t", Expr::local("i"));
                },
                |_| {},
            );
            b.global_store(Expr::local("i"), Expr::local("i"));
        })
        .finish()
        .unwrap();
    run_default(&mut kernel);
    match &kernel.body()[0] {
        Stmt::RangeFor { body, .. } => {
            assert_eq!(body.len(), 1);
            assert!(matches!(body[0], Stmt::GlobalStore { .. }));
        }
        other => panic!("expected the loop to survive, got {:?}", other),
    }
}

#[test]
fn keeps_branch_containing_atomic() {
    // Deleting the arm would change the atomic's invocation count at a
    // shared address, which is observable.
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(8), |b| {
            b.branch(
                Expr::gt(Expr::local("i"), Expr::int(4)),
                |b| {
                    b.atomic(Target::Global(Expr::int(0)), AtomicOp::Add, Expr::int(1));
                },
                |_| {},
            );
        })
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 1);
}

#[test]
fn keeps_branch_whose_store_is_read_later() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("j", ScalarTy::Int)
        .branch(
            Expr::gt(Expr::global(Expr::int(0)), Expr::int(4)),
            |b| {
                b.store("j", Expr::int(1));
            },
            |_| {},
        )
        .global_store(Expr::int(1), Expr::local("j"))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(count_stores(kernel.body()), 1);
    assert!(matches!(kernel.body()[1], Stmt::If { .. }));
}

#[test]
fn drops_only_the_effect_free_arm() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .branch(
            Expr::gt(Expr::global(Expr::int(0)), Expr::int(4)),
            |b| {
                b.global_store(Expr::int(1), Expr::int(7));
            },
            |b| {
                b.local("t", ScalarTy::Int);
                b.store("t", Expr::int(1));
            },
        )
        .finish()
        .unwrap();
    run_default(&mut kernel);
    match &kernel.body()[0] {
        Stmt::If {
            then_body,
            else_body,
            ..
        } => {
            assert_eq!(then_body.len(), 1);
            assert!(else_body.is_empty());
        }
        other => panic!("expected the branch to survive, got {:?}", other),
    }
}

#[test]
fn removes_loop_left_with_no_observable_effect() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(8), |b| {
            b.local("t", ScalarTy::Int);
            b.store("t", Expr::local("i"));
        })
        .global_store(Expr::int(0), Expr::int(1))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.body().len(), 1);
    assert!(matches!(kernel.body()[0], Stmt::GlobalStore { .. }));
}

// ── Atomic demotion ──

#[test]
fn demotes_loop_private_atomic() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(4), |b| {
            b.local("s", ScalarTy::Int);
            b.local("r", ScalarTy::Int);
            b.store("s", Expr::local("i"));
            b.atomic_into("r", Target::Local("s".into()), AtomicOp::Add, Expr::int(42));
            b.global_store(Expr::local("i"), Expr::local("r"));
        })
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 0);
    insta::assert_snapshot!(kernel.to_string(), @r"
kernel k: int {
    for i in 0..4 {
        local s: int
        local r: int
        s = i
        r = s
        s = (r + 42)
        global[i] = r
    }
}");
}

#[test]
fn keeps_atomic_on_lane_shared_local() {
    // `ck` lives outside the loop: every lane updates the same cell, so
    // the update must stay atomic.
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("ck", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(8), |b| {
            b.local("r", ScalarTy::Int);
            b.atomic_into("r", Target::Local("ck".into()), AtomicOp::Add, Expr::int(42));
            b.global_store(Expr::local("i"), Expr::local("r"));
        })
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 1);
}

#[test]
fn keeps_atomic_on_global_target() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(8), |b| {
            b.atomic(Target::Global(Expr::int(8)), AtomicOp::Add, Expr::int(42));
        })
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 1);
}

#[test]
fn demotes_kernel_scope_atomic() {
    // No RangeFor between declaration and update: a single serial lane,
    // trivially private.
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("x", ScalarTy::Int)
        .atomic(Target::Local("x".into()), AtomicOp::Add, Expr::int(1))
        .global_store(Expr::int(0), Expr::local("x"))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 0);
    assert!(kernel.to_string().contains("x = (x + 1)"));
}

#[test]
fn demotion_skips_operand_reading_binding() {
    // r = atomic_add(s, r) would overwrite r before the operand read in
    // demoted form; the atomic stays.
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("s", ScalarTy::Int)
        .local("r", ScalarTy::Int)
        .atomic_into("r", Target::Local("s".into()), AtomicOp::Add, Expr::local("r"))
        .global_store(Expr::int(0), Expr::add(Expr::local("s"), Expr::local("r")))
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 1);
}

#[test]
fn demotes_min_and_max_like_add() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .ranged("i", Expr::int(0), Expr::int(4), |b| {
            b.local("s", ScalarTy::Int);
            b.atomic(Target::Local("s".into()), AtomicOp::Min, Expr::local("i"));
            b.atomic(Target::Local("s".into()), AtomicOp::Max, Expr::local("i"));
            b.global_store(Expr::local("i"), Expr::local("s"));
        })
        .finish()
        .unwrap();
    run_default(&mut kernel);
    assert_eq!(kernel.atomic_count(), 0);
    let printed = kernel.to_string();
    assert!(printed.contains("s = min(s, i)"));
    assert!(printed.contains("s = max(s, i)"));
}

// ── Pipeline invariants ──

#[test]
fn atomic_count_is_preserved_or_demoted_never_dropped() {
    // Atomics in every structural position; the driver's census must
    // account for each one across the whole pipeline.
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("ck", ScalarTy::Int)
        .atomic(Target::Local("ck".into()), AtomicOp::Add, Expr::int(1))
        .ranged("i", Expr::int(0), Expr::int(8), |b| {
            b.local("s", ScalarTy::Int);
            b.atomic(Target::Local("s".into()), AtomicOp::Add, Expr::int(1));
            b.atomic(Target::Local("ck".into()), AtomicOp::Add, Expr::int(1));
            b.branch(
                Expr::gt(Expr::local("i"), Expr::int(4)),
                |b| {
                    b.atomic(Target::Global(Expr::local("i")), AtomicOp::Add, Expr::int(1));
                },
                |_| {},
            );
        })
        .finish()
        .unwrap();
    let before = kernel.atomic_count();
    assert_eq!(before, 4);
    optimize(&mut kernel, &OptConfig::default()).expect("optimizer invariant violated");
    // `ck` updates stay atomic (kernel-scope one is demotable, the
    // in-loop one is not); the in-loop private and global ones resolve
    // per their own rules.
    assert_eq!(kernel.atomic_count(), 2);
}

#[test]
fn disabled_passes_leave_the_kernel_untouched() {
    let mut kernel = KernelBuilder::new("k", ScalarTy::Int)
        .local("j", ScalarTy::Int)
        .store("j", Expr::int(1))
        .finish()
        .unwrap();
    let before = kernel.fingerprint();
    optimize(&mut kernel, &OptConfig::none()).expect("optimizer invariant violated");
    assert_eq!(kernel.fingerprint(), before);
}
