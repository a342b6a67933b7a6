//! Convenience builder for assembling kernel bodies.
//!
//! Front ends (and tests) push statements through scoped closures
//! instead of hand-nesting `Vec<Stmt>` literals; `finish()` runs the
//! same validation as `Kernel::new`.

use super::{AtomicOp, Expr, Kernel, MalformedIr, ScalarTy, Stmt, Target};

pub struct KernelBuilder {
    name: String,
    global_ty: ScalarTy,
    /// Stack of open bodies; the innermost is the one being appended to.
    blocks: Vec<Vec<Stmt>>,
}

impl KernelBuilder {
    pub fn new(name: impl Into<String>, global_ty: ScalarTy) -> KernelBuilder {
        KernelBuilder {
            name: name.into(),
            global_ty,
            blocks: vec![Vec::new()],
        }
    }

    fn push(&mut self, stmt: Stmt) -> &mut Self {
        self.blocks
            .last_mut()
            .expect("builder block stack is never empty")
            .push(stmt);
        self
    }

    pub fn local(&mut self, name: impl Into<String>, ty: ScalarTy) -> &mut Self {
        self.push(Stmt::LocalDecl {
            name: name.into(),
            ty,
        })
    }

    pub fn store(&mut self, name: impl Into<String>, value: Expr) -> &mut Self {
        self.push(Stmt::LocalStore {
            name: name.into(),
            value,
        })
    }

    pub fn global_store(&mut self, addr: Expr, value: Expr) -> &mut Self {
        self.push(Stmt::GlobalStore { addr, value })
    }

    /// Atomic update whose returned pre-update value is discarded.
    pub fn atomic(&mut self, target: Target, op: AtomicOp, operand: Expr) -> &mut Self {
        self.push(Stmt::AtomicUpdate {
            target,
            op,
            operand,
            binding: None,
        })
    }

    /// Atomic update binding the pre-update value to `binding`.
    pub fn atomic_into(
        &mut self,
        binding: impl Into<String>,
        target: Target,
        op: AtomicOp,
        operand: Expr,
    ) -> &mut Self {
        self.push(Stmt::AtomicUpdate {
            target,
            op,
            operand,
            binding: Some(binding.into()),
        })
    }

    /// `for var in lo..hi { ... }` with the body built inside `build`.
    pub fn ranged(
        &mut self,
        var: impl Into<String>,
        lo: Expr,
        hi: Expr,
        build: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.blocks.push(Vec::new());
        build(self);
        let body = self.blocks.pop().expect("ranged body was pushed above");
        self.push(Stmt::RangeFor {
            var: var.into(),
            lo,
            hi,
            body,
        })
    }

    /// `if cond { ... } else { ... }`; pass an empty closure for a
    /// missing else arm.
    pub fn branch(
        &mut self,
        cond: Expr,
        build_then: impl FnOnce(&mut Self),
        build_else: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.blocks.push(Vec::new());
        build_then(self);
        let then_body = self.blocks.pop().expect("then body was pushed above");
        self.blocks.push(Vec::new());
        build_else(self);
        let else_body = self.blocks.pop().expect("else body was pushed above");
        self.push(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    pub fn finish(&mut self) -> Result<Kernel, MalformedIr> {
        debug_assert_eq!(self.blocks.len(), 1, "unclosed nested body");
        let body = self.blocks.pop().unwrap_or_default();
        self.blocks.push(Vec::new());
        Kernel::new(std::mem::take(&mut self.name), self.global_ty, body)
    }
}
