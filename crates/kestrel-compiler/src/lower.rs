//! Lowering
//!
//! Serializes the optimized IR into the register-machine wire format. Pass
//! one appends the prelude and every op in block-insertion order, recording
//! each block's byte offset and leaving branch labels zeroed. Pass two walks
//! the emitted bytes again, sizes op by op, and patches the label of every
//! block-terminating branch to the absolute offset of its target block.

use crate::error::{RecompileError, RecompileResult};
use crate::ir::{BlockId, Op, Program, Register};
use kestrel_bytecode::{
    Opcode, RMachineOp, RMachineWriter, RegisterPrelude, WireReg, BRANCH_LABEL_OFFSET,
    PRELUDE_SIZE, REG_ABSENT,
};
use tracing::trace;

/// Serialize a program, patching all branch labels. Fills in every block's
/// `reg_offset` along the way.
pub fn lower(program: &mut Program) -> RecompileResult<Vec<u8>> {
    let mut writer = RMachineWriter::new();
    writer.emit_prelude(&RegisterPrelude::new(program.num_reg as u32));

    // First pass: dump all operations and record their positions.
    for i in 0..program.blocks.len() {
        debug_assert!(!program.blocks[i].dead);
        program.blocks[i].reg_offset = writer.offset();
        for j in 0..program.blocks[i].code.len() {
            debug_assert!(!program.blocks[i].code[j].dead);
            let offset = writer.offset();
            write_op(&mut writer, &program.blocks[i].code[j])?;
            trace!(
                "wrote op at offset {}, size {}: {}",
                offset,
                writer.offset() - offset,
                program.blocks[i].code[j]
            );
        }
    }

    // Second pass: patch branch labels now that every block's offset is
    // known.
    let mut pos = PRELUDE_SIZE;
    for i in 0..program.blocks.len() {
        let block = &program.blocks[i];
        debug_assert_eq!(pos, block.reg_offset);

        // Step to the end of the block.
        let mut last: Option<(usize, &Op)> = None;
        for op in &block.code {
            let size = RMachineOp::size_at(writer.buffer(), pos)
                .map_err(|err| RecompileError::Invariant(err.to_string()))?;
            last = Some((pos, op));
            pos += size;
        }

        let Some((op_pos, op)) = last else {
            // Blocks that emitted nothing have nothing to patch.
            continue;
        };
        if !op.code.is_branch() || op.code == Opcode::ReturnValue {
            continue;
        }

        let target = match block.exits.as_slice() {
            &[target] => target,
            &[a, b] => {
                // One exit must fall through to the textually next block.
                let next = BlockId(i + 1);
                if a == next {
                    b
                } else if b == next {
                    a
                } else {
                    return Err(RecompileError::Invariant(format!(
                        "no fall-through neighbor for bb_{} (exits bb_{}, bb_{})",
                        block.idx,
                        program.blocks[a.0].idx,
                        program.blocks[b.0].idx
                    )));
                }
            }
            exits => {
                return Err(RecompileError::Invariant(format!(
                    "branch {} in bb_{} has {} exits",
                    op.code.name(),
                    block.idx,
                    exits.len()
                )));
            }
        };

        let label = program.blocks[target.0].reg_offset;
        debug_assert!(label > 0);
        writer.patch_u32(op_pos + BRANCH_LABEL_OFFSET, label as u32);
    }

    Ok(writer.into_bytes())
}

/// Encode one IR op into its wire shape.
fn write_op(writer: &mut RMachineWriter, op: &Op) -> RecompileResult<()> {
    let arg = u16::try_from(op.arg).map_err(|_| {
        RecompileError::Invariant(format!(
            "immediate {} of {} overflows the wire format",
            op.arg,
            op.code.name()
        ))
    })?;
    writer.emit_u8(op.code.to_u8());
    writer.emit_u16(arg);

    if op.code.is_varargs() {
        writer.emit_u16(op.regs.len() as u16);
        for &reg in &op.regs {
            writer.emit_reg(wire_reg(op, reg)?);
        }
    } else if op.code.is_branch() {
        if op.regs.len() > 2 {
            return Err(RecompileError::Invariant(format!(
                "branch {} carries {} registers",
                op.code.name(),
                op.regs.len()
            )));
        }
        for slot in 0..2 {
            writer.emit_reg(slot_reg(op, slot)?);
        }
        // Labels are patched after the first pass has fixed every offset.
        writer.emit_u32(0);
    } else {
        if op.regs.len() > 3 {
            return Err(RecompileError::Invariant(format!(
                "{} carries {} registers",
                op.code.name(),
                op.regs.len()
            )));
        }
        for slot in 0..3 {
            writer.emit_reg(slot_reg(op, slot)?);
        }
    }
    Ok(())
}

fn slot_reg(op: &Op, slot: usize) -> RecompileResult<WireReg> {
    match op.regs.get(slot) {
        Some(&reg) => wire_reg(op, reg),
        None => Ok(REG_ABSENT),
    }
}

fn wire_reg(op: &Op, reg: Register) -> RecompileResult<WireReg> {
    WireReg::try_from(reg).map_err(|_| {
        RecompileError::Invariant(format!(
            "register {} of {} overflows the wire format",
            reg,
            op.code.name()
        ))
    })
}
