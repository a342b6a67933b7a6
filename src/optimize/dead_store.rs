//! Dead store elimination over kernel-local variables.
//!
//! A write is eliminable iff the usage map attributes zero reads to it,
//! it is a plain `LocalStore` (not the side-effect half of an
//! `AtomicUpdate`), and it does not land on a lane-shared variable.
//! Eliminability is read reachability, not "is this the last write":
//! a store observed by an atomic's read survives even when the
//! variable is overwritten immediately afterwards.
//!
//! An atomic whose bound result is never read keeps its node and loses
//! only the binding. Declarations with no remaining references are
//! dropped. Each deletion can unshadow an earlier store, so the pass
//! re-analyzes and repeats until a round removes nothing.

use crate::analysis::{locate_block, StmtPath, UsageMap, WriteKind};
use crate::ir::{Kernel, Stmt};

pub(crate) fn run(kernel: &mut Kernel) -> bool {
    let mut changed = false;
    loop {
        let usage = UsageMap::analyze(kernel);

        let mut unbind: Vec<StmtPath> = Vec::new();
        let mut remove: Vec<StmtPath> = Vec::new();
        for record in &usage.writes {
            if record.reads > 0 || record.lane_shared {
                continue;
            }
            match record.kind {
                WriteKind::Store => remove.push(record.path.clone()),
                WriteKind::AtomicResult => unbind.push(record.path.clone()),
                WriteKind::AtomicTarget | WriteKind::LoopVar => {}
            }
        }
        for (var, path) in &usage.decls {
            let stats = usage.stats(var);
            if stats.reads == 0
                && stats.stores == 0
                && stats.atomic_targets == 0
                && stats.atomic_results == 0
            {
                remove.push(path.clone());
            }
        }

        if unbind.is_empty() && remove.is_empty() {
            return changed;
        }
        changed = true;
        log::debug!(
            "dead_store: kernel `{}`: removing {} statements, clearing {} bindings",
            kernel.name,
            remove.len(),
            unbind.len()
        );

        for path in &unbind {
            let (block, index) = locate_block(&mut kernel.body, &path.0);
            match &mut block[index] {
                Stmt::AtomicUpdate { binding, .. } => *binding = None,
                other => unreachable!("unbind path led to {:?}", other),
            }
        }
        // Descending document order: removing a statement never shifts
        // the paths still to be removed.
        remove.sort();
        for path in remove.iter().rev() {
            let (block, index) = locate_block(&mut kernel.body, &path.0);
            block.remove(index);
        }
    }
}
