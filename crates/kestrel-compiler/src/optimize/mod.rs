//! IR optimization passes
//!
//! Two traversal skeletons exist. Forward passes iterate blocks in insertion
//! order and ops in program order; backward passes iterate both in reverse.
//! Both skip dead blocks and dead ops, and every pass run ends by compacting
//! op lists and the block list.
//!
//! The pipeline order is fixed: entry marking, block fusion, copy
//! propagation, store elimination, dead-code elimination. Store elimination
//! and dead-code elimination each recount register uses on entry; counts are
//! not carried between passes because every pass invalidates them.

mod copy_prop;
mod dce;
mod fuse;
mod store_elim;

pub use copy_prop::CopyPropagation;
pub use dce::DeadCodeElim;
pub use fuse::{FuseBlocks, MarkEntries};
pub use store_elim::StoreElim;

use crate::ir::{BlockId, Op, Program, Register};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Forward traversal skeleton: blocks in insertion order, ops in program
/// order.
pub trait Pass {
    /// Hook run once before traversal (use counting and similar setup)
    fn prepare(&mut self, _program: &mut Program) {}

    /// Per-op visitor used by the default block visitor
    fn visit_op(&mut self, _op: &mut Op) {}

    /// Per-block visitor; the default walks live ops forward
    fn visit_block(&mut self, program: &mut Program, id: BlockId) {
        for op in &mut program.block_mut(id).code {
            if !op.dead {
                self.visit_op(op);
            }
        }
    }

    /// Run the pass over the whole program and compact afterwards
    fn run(&mut self, program: &mut Program) {
        self.prepare(program);
        for block in &mut program.blocks {
            block.visited = false;
        }
        for i in 0..program.blocks.len() {
            if !program.blocks[i].dead && !program.blocks[i].visited {
                self.visit_block(program, BlockId(i));
                program.blocks[i].visited = true;
            }
        }
        program.compact();
    }
}

/// Backward traversal skeleton: blocks in reverse insertion order, ops in
/// reverse program order.
pub trait BackwardPass {
    /// Hook run once before traversal
    fn prepare(&mut self, _program: &mut Program) {}

    /// Per-op visitor used by the default block visitor
    fn visit_op(&mut self, _op: &mut Op) {}

    /// Per-block visitor; the default walks live ops in reverse
    fn visit_block(&mut self, program: &mut Program, id: BlockId) {
        for op in program.block_mut(id).code.iter_mut().rev() {
            if !op.dead {
                self.visit_op(op);
            }
        }
    }

    /// Run the pass over the whole program and compact afterwards
    fn run(&mut self, program: &mut Program) {
        self.prepare(program);
        for block in &mut program.blocks {
            block.visited = false;
        }
        for i in (0..program.blocks.len()).rev() {
            if !program.blocks[i].dead && !program.blocks[i].visited {
                self.visit_block(program, BlockId(i));
                program.blocks[i].visited = true;
            }
        }
        program.compact();
    }
}

/// Per-register use counter shared by store elimination and dead-code
/// elimination.
#[derive(Debug, Default)]
pub(crate) struct UseCounts {
    counts: FxHashMap<Register, i32>,
}

impl UseCounts {
    pub(crate) fn get(&self, reg: Register) -> i32 {
        self.counts.get(&reg).copied().unwrap_or(0)
    }

    pub(crate) fn decr(&mut self, reg: Register) {
        *self.counts.entry(reg).or_insert(0) -= 1;
    }

    /// Count every input-register occurrence across all live ops of all
    /// live blocks.
    pub(crate) fn count_uses(&mut self, program: &Program) {
        self.counts.clear();
        for block in program.blocks.iter().filter(|block| !block.dead) {
            for op in block.code.iter().filter(|op| !op.dead) {
                for &reg in op.inputs() {
                    *self.counts.entry(reg).or_insert(0) += 1;
                }
            }
        }
    }
}

/// Run the full pass pipeline in its fixed order.
pub fn optimize(program: &mut Program) {
    MarkEntries.run(program);
    FuseBlocks.run(program);
    CopyPropagation.run(program);
    StoreElim::default().run(program);
    DeadCodeElim::default().run(program);
    trace!(
        "optimized down to {} blocks:\n{}",
        program.blocks.len(),
        program
    );
}
