//! Copy propagation
//!
//! Forwards simple register renames within a block: every input register is
//! rewritten through an environment of known moves, so consumers read the
//! original source directly. No cross-block propagation.

use super::Pass;
use crate::ir::{BlockId, Program, Register};
use kestrel_bytecode::Opcode;
use rustc_hash::FxHashMap;

/// Block-local forwarding of register-to-register moves
pub struct CopyPropagation;

impl Pass for CopyPropagation {
    fn visit_block(&mut self, program: &mut Program, id: BlockId) {
        let mut env: FxHashMap<Register, Register> = FxHashMap::default();
        for op in &mut program.block_mut(id).code {
            if op.dead {
                continue;
            }

            let num_inputs = op.num_inputs();
            for reg in &mut op.regs[..num_inputs] {
                if let Some(&forwarded) = env.get(reg) {
                    *reg = forwarded;
                }
            }

            // Moves extend the environment; later entries chase earlier
            // ones so chains stay flat.
            if matches!(
                op.code,
                Opcode::LoadFast | Opcode::StoreFast | Opcode::LoadConst
            ) {
                let mut source = op.regs[0];
                if let Some(&forwarded) = env.get(&source) {
                    source = forwarded;
                }
                env.insert(op.regs[1], source);
            }
        }
    }
}
