//! Construction-time validation of kernel IR.
//!
//! Runs once inside `Kernel::new`; a kernel that fails here never
//! reaches the optimizer or the executor. Checks that every variable
//! reference resolves to a declaration, that no name is re-declared
//! while still visible, and that every operand has the declared type.

use super::{Expr, Kernel, ScalarTy, Stmt, Target};
use std::collections::HashMap;
use std::fmt;

/// A data-model violation found while constructing a kernel. Fatal:
/// compilation aborts and no partial IR is handed downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MalformedIr {
    UndeclaredVariable {
        name: String,
    },
    /// The name is already visible, either in the same scope or in an
    /// enclosing one. Shadowing is rejected outright; front ends emit
    /// unique temporaries.
    DuplicateDeclaration {
        name: String,
    },
    TypeMismatch {
        context: String,
        expected: ScalarTy,
        found: ScalarTy,
    },
}

impl fmt::Display for MalformedIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedIr::UndeclaredVariable { name } => {
                write!(f, "reference to undeclared variable `{}`", name)
            }
            MalformedIr::DuplicateDeclaration { name } => {
                write!(f, "variable `{}` is already declared in a visible scope", name)
            }
            MalformedIr::TypeMismatch {
                context,
                expected,
                found,
            } => write!(
                f,
                "type mismatch in {}: expected {}, found {}",
                context, expected, found
            ),
        }
    }
}

impl std::error::Error for MalformedIr {}

/// Lexically scoped name table. One frame per nested body.
struct Scopes {
    frames: Vec<HashMap<String, ScalarTy>>,
    global_ty: ScalarTy,
}

impl Scopes {
    fn new(global_ty: ScalarTy) -> Scopes {
        Scopes {
            frames: vec![HashMap::new()],
            global_ty,
        }
    }

    fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn declare(&mut self, name: &str, ty: ScalarTy) -> Result<(), MalformedIr> {
        if self.lookup(name).is_some() {
            return Err(MalformedIr::DuplicateDeclaration { name: name.into() });
        }
        self.frames
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.into(), ty);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<ScalarTy> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
    }

    fn resolve(&self, name: &str) -> Result<ScalarTy, MalformedIr> {
        self.lookup(name)
            .ok_or_else(|| MalformedIr::UndeclaredVariable { name: name.into() })
    }
}

pub(super) fn validate(kernel: &Kernel) -> Result<(), MalformedIr> {
    let mut scopes = Scopes::new(kernel.global_ty);
    check_block(&kernel.body, &mut scopes)
}

fn check_block(body: &[Stmt], scopes: &mut Scopes) -> Result<(), MalformedIr> {
    for stmt in body {
        match stmt {
            Stmt::LocalDecl { name, ty } => scopes.declare(name, *ty)?,
            Stmt::LocalStore { name, value } => {
                let decl_ty = scopes.resolve(name)?;
                let value_ty = expr_ty(value, scopes)?;
                expect_ty(
                    decl_ty,
                    value_ty,
                    || format!("store to local `{}`", name),
                )?;
            }
            Stmt::GlobalStore { addr, value } => {
                check_address(addr, scopes)?;
                let value_ty = expr_ty(value, scopes)?;
                expect_ty(scopes.global_ty, value_ty, || "global store value".into())?;
            }
            Stmt::AtomicUpdate {
                target,
                operand,
                binding,
                ..
            } => {
                let target_ty = match target {
                    Target::Local(name) => scopes.resolve(name)?,
                    Target::Global(addr) => {
                        check_address(addr, scopes)?;
                        scopes.global_ty
                    }
                };
                let operand_ty = expr_ty(operand, scopes)?;
                expect_ty(target_ty, operand_ty, || {
                    format!("atomic operand for target `{}`", target)
                })?;
                if let Some(name) = binding {
                    let binding_ty = scopes.resolve(name)?;
                    expect_ty(binding_ty, target_ty, || {
                        format!("atomic result binding `{}`", name)
                    })?;
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond_ty = expr_ty(cond, scopes)?;
                expect_ty(ScalarTy::Int, cond_ty, || "branch condition".into())?;
                scopes.push();
                check_block(then_body, scopes)?;
                scopes.pop();
                scopes.push();
                check_block(else_body, scopes)?;
                scopes.pop();
            }
            Stmt::RangeFor { var, lo, hi, body } => {
                expect_ty(ScalarTy::Int, expr_ty(lo, scopes)?, || {
                    "range lower bound".into()
                })?;
                expect_ty(ScalarTy::Int, expr_ty(hi, scopes)?, || {
                    "range upper bound".into()
                })?;
                scopes.push();
                scopes.declare(var, ScalarTy::Int)?;
                check_block(body, scopes)?;
                scopes.pop();
            }
        }
    }
    Ok(())
}

fn check_address(addr: &Expr, scopes: &Scopes) -> Result<(), MalformedIr> {
    expect_ty(ScalarTy::Int, expr_ty(addr, scopes)?, || {
        "global address".into()
    })
}

fn expr_ty(expr: &Expr, scopes: &Scopes) -> Result<ScalarTy, MalformedIr> {
    match expr {
        Expr::Const(v) => Ok(v.ty()),
        Expr::LocalLoad(name) => scopes.resolve(name),
        Expr::GlobalLoad(addr) => {
            check_address(addr, scopes)?;
            Ok(scopes.global_ty)
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs_ty = expr_ty(lhs, scopes)?;
            let rhs_ty = expr_ty(rhs, scopes)?;
            expect_ty(lhs_ty, rhs_ty, || format!("operands of `{:?}`", op))?;
            if op.is_comparison() {
                Ok(ScalarTy::Int)
            } else {
                Ok(lhs_ty)
            }
        }
    }
}

fn expect_ty(
    expected: ScalarTy,
    found: ScalarTy,
    context: impl FnOnce() -> String,
) -> Result<(), MalformedIr> {
    if expected == found {
        Ok(())
    } else {
        Err(MalformedIr::TypeMismatch {
            context: context(),
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AtomicOp, Expr, Kernel, ScalarTy, Stmt, Target};
    use super::MalformedIr;

    #[test]
    fn rejects_undeclared_reference() {
        let err = Kernel::new(
            "k",
            ScalarTy::Int,
            vec![Stmt::LocalStore {
                name: "j".into(),
                value: Expr::int(0),
            }],
        )
        .unwrap_err();
        assert_eq!(err, MalformedIr::UndeclaredVariable { name: "j".into() });
    }

    #[test]
    fn rejects_duplicate_declaration() {
        let decl = Stmt::LocalDecl {
            name: "j".into(),
            ty: ScalarTy::Int,
        };
        let err = Kernel::new("k", ScalarTy::Int, vec![decl.clone(), decl]).unwrap_err();
        assert_eq!(err, MalformedIr::DuplicateDeclaration { name: "j".into() });
    }

    #[test]
    fn rejects_shadowing_in_nested_scope() {
        let err = Kernel::new(
            "k",
            ScalarTy::Int,
            vec![
                Stmt::LocalDecl {
                    name: "i".into(),
                    ty: ScalarTy::Int,
                },
                Stmt::RangeFor {
                    var: "i".into(),
                    lo: Expr::int(0),
                    hi: Expr::int(4),
                    body: vec![],
                },
            ],
        )
        .unwrap_err();
        assert_eq!(err, MalformedIr::DuplicateDeclaration { name: "i".into() });
    }

    #[test]
    fn rejects_atomic_operand_type_mismatch() {
        let err = Kernel::new(
            "k",
            ScalarTy::Int,
            vec![
                Stmt::LocalDecl {
                    name: "s".into(),
                    ty: ScalarTy::Int,
                },
                Stmt::AtomicUpdate {
                    target: Target::Local("s".into()),
                    op: AtomicOp::Add,
                    operand: Expr::float(1.0),
                    binding: None,
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, MalformedIr::TypeMismatch { .. }));
    }

    #[test]
    fn rejects_float_condition() {
        let err = Kernel::new(
            "k",
            ScalarTy::Int,
            vec![Stmt::If {
                cond: Expr::float(1.0),
                then_body: vec![],
                else_body: vec![],
            }],
        )
        .unwrap_err();
        assert!(matches!(err, MalformedIr::TypeMismatch { .. }));
    }

    #[test]
    fn accepts_branch_scoped_redeclaration() {
        // The same name may be declared in both arms: the scopes never
        // overlap.
        let kernel = Kernel::new(
            "k",
            ScalarTy::Int,
            vec![Stmt::If {
                cond: Expr::int(1),
                then_body: vec![Stmt::LocalDecl {
                    name: "t".into(),
                    ty: ScalarTy::Int,
                }],
                else_body: vec![Stmt::LocalDecl {
                    name: "t".into(),
                    ty: ScalarTy::Float,
                }],
            }],
        );
        assert!(kernel.is_ok());
    }
}
