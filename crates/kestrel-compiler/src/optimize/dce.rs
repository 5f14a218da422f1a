//! Dead-code elimination
//!
//! Backward scan: a pure op whose destination has no remaining uses dies,
//! and its inputs' use counts drop so transitively dead definitions become
//! eligible within the same pass.

use super::{BackwardPass, UseCounts};
use crate::ir::{Op, Program};

/// Pure-operation elimination driven by whole-program use counts
#[derive(Default)]
pub struct DeadCodeElim {
    counts: UseCounts,
}

impl BackwardPass for DeadCodeElim {
    fn prepare(&mut self, program: &mut Program) {
        self.counts.count_uses(program);
    }

    fn visit_op(&mut self, op: &mut Op) {
        if !op.has_dest || !op.code.is_pure() {
            return;
        }
        if self.counts.get(op.dest()) != 0 {
            return;
        }
        op.dead = true;
        for i in 0..op.num_inputs() {
            self.counts.decr(op.regs[i]);
        }
    }
}
