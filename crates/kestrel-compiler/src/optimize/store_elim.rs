//! Store elimination
//!
//! Fuses an `X = op; Y = X` chain into `Y = op`: when a move's source is
//! defined in the same block and that definition has exactly one use (the
//! move itself), the defining op is redirected to write the move's target
//! and the move dies.

use super::{Pass, UseCounts};
use crate::ir::{BlockId, Program, Register, NO_REG};
use kestrel_bytecode::Opcode;
use rustc_hash::FxHashMap;

/// Block-local move elimination driven by whole-program use counts
#[derive(Default)]
pub struct StoreElim {
    counts: UseCounts,
}

impl Pass for StoreElim {
    fn prepare(&mut self, program: &mut Program) {
        self.counts.count_uses(program);
    }

    fn visit_block(&mut self, program: &mut Program, id: BlockId) {
        // Registers to their latest definition in this block.
        let mut defs: FxHashMap<Register, usize> = FxHashMap::default();

        let block = program.block_mut(id);
        for i in 0..block.code.len() {
            if block.code[i].dead {
                continue;
            }

            let mut target = NO_REG;
            if block.code[i].has_dest {
                target = block.code[i].dest();
                defs.insert(target, i);
            }

            if matches!(block.code[i].code, Opcode::LoadFast | Opcode::StoreFast) {
                let source = block.code[i].regs[0];
                if let Some(&def_idx) = defs.get(&source) {
                    if self.counts.get(source) == 1 {
                        block.code[def_idx].set_dest(target);
                        block.code[i].dead = true;
                    }
                }
            }
        }
    }
}
