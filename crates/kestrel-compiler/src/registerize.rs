//! Registerization
//!
//! Converts stack-machine bytecode to an infinite register machine. The
//! operand stack is modeled symbolically: instead of pushing and popping
//! values, opcodes push and pop register *names*, which are then used to
//! build the register form of each instruction.
//!
//! ```text
//! LOAD_CONST 1
//! LOAD_CONST 2
//! BINARY_ADD
//!
//! --->
//!
//! r1 = 1          ('push' r1)
//! r2 = 2          ('push' r2)
//! r3 = add r1, r2 ('pop' r1, r2)
//! ```
//!
//! Control flow forks recurse down each branch with a clone of the current
//! stack; jumping into a region that is already compiled reuses the extant
//! block, which is what terminates loops.

use crate::error::{RecompileError, RecompileResult};
use crate::ir::{BlockId, Program, NO_REG};
use crate::stack::SymStack;
use kestrel_bytecode::Opcode;
use tracing::debug;

/// Abstract-interpret the source bytecode starting at `offset`, growing the
/// block graph of `program`. Returns the entry block of the synthesized
/// subgraph.
pub fn registerize(
    program: &mut Program,
    stack: &mut SymStack,
    offset: usize,
) -> RecompileResult<BlockId> {
    // Already compiled this offset: merge by reusing the block.
    if let Some(existing) = program.block_at(offset) {
        return Ok(existing);
    }

    let mut entry_point: Option<BlockId> = None;
    let mut last: Option<BlockId> = None;
    let mut offset = offset;

    while offset < program.code.len() {
        let byte = program.code[offset];
        let opcode = Opcode::from_u8(byte).ok_or(RecompileError::UnknownOpcode(byte))?;
        let size = opcode.instr_size();
        if offset + size > program.code.len() {
            return Err(RecompileError::Invariant(format!(
                "truncated {} at offset {}",
                opcode.name(),
                offset
            )));
        }
        let oparg = if opcode.has_arg() {
            program.arg_at(offset)
        } else {
            0
        };

        // Pure permutations of the symbolic stack are folded away without
        // emitting IR and without starting a block.
        match opcode {
            Opcode::Nop => {
                offset += size;
                continue;
            }
            Opcode::RotTwo => {
                let r1 = stack.pop()?;
                let r2 = stack.pop()?;
                stack.push(r1)?;
                stack.push(r2)?;
                offset += size;
                continue;
            }
            Opcode::RotThree => {
                let r1 = stack.pop()?;
                let r2 = stack.pop()?;
                let r3 = stack.pop()?;
                stack.push(r1)?;
                stack.push(r3)?;
                stack.push(r2)?;
                offset += size;
                continue;
            }
            _ => {}
        }

        // The walk has advanced into a region that is already compiled:
        // patch ourselves into it and stop.
        if let Some(old) = program.block_at(offset) {
            return Ok(match (entry_point, last) {
                (Some(entry), Some(prev)) => {
                    program.block_mut(prev).exits.push(old);
                    entry
                }
                // Nothing emitted yet (the prefix was stack permutation
                // only); the existing block is the entry itself.
                _ => old,
            });
        }

        let bb = program.alloc_block(offset);
        if entry_point.is_none() {
            entry_point = Some(bb);
        }
        if let Some(prev) = last {
            program.block_mut(prev).exits.push(bb);
        }
        last = Some(bb);

        match opcode {
            // ===== Stack shuffling that emits nothing =====
            Opcode::DupTop => {
                let r1 = stack.pop()?;
                stack.push(r1)?;
                stack.push(r1)?;
            }
            Opcode::DupTopx => {
                if oparg == 2 {
                    let r1 = stack.pop()?;
                    let r2 = stack.pop()?;
                    stack.push(r2)?;
                    stack.push(r1)?;
                    stack.push(r2)?;
                    stack.push(r1)?;
                } else {
                    let r1 = stack.pop()?;
                    let r2 = stack.pop()?;
                    let r3 = stack.pop()?;
                    stack.push(r3)?;
                    stack.push(r2)?;
                    stack.push(r1)?;
                    stack.push(r3)?;
                    stack.push(r2)?;
                    stack.push(r1)?;
                }
            }
            Opcode::PopTop => {
                let r1 = stack.pop()?;
                program.block_mut(bb).add_op(Opcode::Decref, 0, &[r1]);
            }

            // ===== Loads: push one fresh register =====
            Opcode::LoadConst => {
                // Constants occupy the first num_consts registers; the load
                // becomes a register-to-register move.
                let src = oparg as i32;
                let dest = program.next_reg();
                stack.push(dest)?;
                program
                    .block_mut(bb)
                    .add_dest_op(Opcode::LoadFast, 0, &[src, dest]);
            }
            Opcode::LoadFast => {
                let src = program.num_consts + oparg as i32;
                let dest = program.next_reg();
                stack.push(dest)?;
                program
                    .block_mut(bb)
                    .add_dest_op(Opcode::LoadFast, 0, &[src, dest]);
            }
            Opcode::LoadClosure
            | Opcode::LoadDeref
            | Opcode::LoadGlobal
            | Opcode::LoadLocals
            | Opcode::LoadName => {
                let dest = program.next_reg();
                stack.push(dest)?;
                program.block_mut(bb).add_dest_op(opcode, oparg, &[dest]);
            }
            Opcode::LoadAttr => {
                let obj = stack.pop()?;
                let dest = program.next_reg();
                stack.push(dest)?;
                program.block_mut(bb).add_dest_op(opcode, oparg, &[obj, dest]);
            }

            // ===== Stores: consume registers =====
            Opcode::StoreFast => {
                let value = stack.pop()?;
                let slot = program.num_consts + oparg as i32;
                program
                    .block_mut(bb)
                    .add_dest_op(opcode, 0, &[value, slot]);
            }
            Opcode::StoreDeref | Opcode::StoreGlobal | Opcode::StoreName => {
                let value = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[value]);
            }
            Opcode::StoreAttr => {
                let r1 = stack.pop()?;
                let r2 = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[r1, r2]);
            }
            Opcode::StoreMap => {
                let r1 = stack.pop()?;
                let r2 = stack.pop()?;
                let map = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[r1, r2, map]);
                // The map stays on the stack while the literal is built.
                stack.push(map)?;
            }
            Opcode::StoreSubscr => {
                let r1 = stack.pop()?;
                let r2 = stack.pop()?;
                let r3 = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[r1, r2, r3]);
            }

            Opcode::GetIter => {
                let obj = stack.pop()?;
                let dest = program.next_reg();
                stack.push(dest)?;
                program.block_mut(bb).add_dest_op(opcode, oparg, &[obj, dest]);
            }

            // ===== Slicing =====
            Opcode::Slice0 | Opcode::Slice1 | Opcode::Slice2 | Opcode::Slice3 => {
                let bits = opcode.to_u8() - Opcode::Slice0.to_u8();
                let stop = if bits & 2 != 0 { Some(stack.pop()?) } else { None };
                let start = if bits & 1 != 0 { Some(stack.pop()?) } else { None };
                let obj = stack.pop()?;
                let dest = program.next_reg();
                stack.push(dest)?;
                let mut regs = vec![obj];
                regs.extend(start);
                regs.extend(stop);
                regs.push(dest);
                program.block_mut(bb).add_dest_op(opcode, oparg, &regs);
            }
            Opcode::StoreSlice0
            | Opcode::StoreSlice1
            | Opcode::StoreSlice2
            | Opcode::StoreSlice3 => {
                let bits = opcode.to_u8() - Opcode::StoreSlice0.to_u8();
                let stop = if bits & 2 != 0 { Some(stack.pop()?) } else { None };
                let start = if bits & 1 != 0 { Some(stack.pop()?) } else { None };
                let obj = stack.pop()?;
                let value = stack.pop()?;
                let mut regs = vec![value, obj];
                regs.extend(start);
                regs.extend(stop);
                program.block_mut(bb).add_op(opcode, oparg, &regs);
            }
            Opcode::DeleteSlice0
            | Opcode::DeleteSlice1
            | Opcode::DeleteSlice2
            | Opcode::DeleteSlice3 => {
                let bits = opcode.to_u8() - Opcode::DeleteSlice0.to_u8();
                let stop = if bits & 2 != 0 { Some(stack.pop()?) } else { None };
                let start = if bits & 1 != 0 { Some(stack.pop()?) } else { None };
                let obj = stack.pop()?;
                let mut regs = vec![obj];
                regs.extend(start);
                regs.extend(stop);
                program.block_mut(bb).add_op(opcode, oparg, &regs);
            }

            Opcode::ListAppend => {
                let value = stack.pop()?;
                // The target list is an input, not a destination: it is
                // mutated in place.
                let list = stack.peek(oparg as usize)?;
                program.block_mut(bb).add_op(opcode, oparg, &[value, list]);
            }

            // ===== Unary operations: pop 1, push 1 =====
            Opcode::UnaryPositive
            | Opcode::UnaryNegative
            | Opcode::UnaryNot
            | Opcode::UnaryConvert
            | Opcode::UnaryInvert => {
                let operand = stack.pop()?;
                let dest = program.next_reg();
                stack.push(dest)?;
                program
                    .block_mut(bb)
                    .add_dest_op(opcode, oparg, &[operand, dest]);
            }

            // ===== Binary operations: pop 2, push 1 =====
            Opcode::BinaryPower
            | Opcode::BinaryMultiply
            | Opcode::BinaryDivide
            | Opcode::BinaryTrueDivide
            | Opcode::BinaryFloorDivide
            | Opcode::BinaryModulo
            | Opcode::BinaryAdd
            | Opcode::BinarySubtract
            | Opcode::BinarySubscr
            | Opcode::BinaryLshift
            | Opcode::BinaryRshift
            | Opcode::BinaryAnd
            | Opcode::BinaryXor
            | Opcode::BinaryOr
            | Opcode::InplacePower
            | Opcode::InplaceMultiply
            | Opcode::InplaceDivide
            | Opcode::InplaceTrueDivide
            | Opcode::InplaceFloorDivide
            | Opcode::InplaceModulo
            | Opcode::InplaceAdd
            | Opcode::InplaceSubtract
            | Opcode::InplaceLshift
            | Opcode::InplaceRshift
            | Opcode::InplaceAnd
            | Opcode::InplaceXor
            | Opcode::InplaceOr
            | Opcode::CompareOp => {
                let r1 = stack.pop()?;
                let r2 = stack.pop()?;
                let dest = program.next_reg();
                stack.push(dest)?;
                program
                    .block_mut(bb)
                    .add_dest_op(opcode, oparg, &[r1, r2, dest]);
            }

            // ===== Calls =====
            Opcode::CallFunction
            | Opcode::CallFunctionVar
            | Opcode::CallFunctionKw
            | Opcode::CallFunctionVarKw => {
                let na = (oparg & 0xff) as usize;
                let nk = ((oparg >> 8) & 0xff) as usize;
                let n = na + 2 * nk;
                let mut regs = vec![NO_REG; n + 2];
                for slot in (0..n).rev() {
                    regs[slot] = stack.pop()?;
                }
                regs[n] = stack.pop()?;
                let dest = program.next_reg();
                stack.push(dest)?;
                regs[n + 1] = dest;
                program.block_mut(bb).add_varargs_op(opcode, oparg, &regs);
            }

            // ===== Literal builders =====
            Opcode::BuildList | Opcode::BuildSet | Opcode::BuildTuple => {
                let n = oparg as usize;
                let mut regs = vec![NO_REG; n + 1];
                for slot in regs.iter_mut().take(n) {
                    *slot = stack.pop()?;
                }
                let dest = program.next_reg();
                stack.push(dest)?;
                regs[n] = dest;
                program.block_mut(bb).add_varargs_op(opcode, oparg, &regs);
            }
            Opcode::BuildMap => {
                let dest = program.next_reg();
                stack.push(dest)?;
                program.block_mut(bb).add_dest_op(opcode, oparg, &[dest]);
            }
            Opcode::BuildSlice => {
                let step = if oparg == 3 { Some(stack.pop()?) } else { None };
                let stop = stack.pop()?;
                let start = stack.pop()?;
                let dest = program.next_reg();
                stack.push(dest)?;
                let mut regs = vec![start, stop];
                regs.extend(step);
                regs.push(dest);
                program.block_mut(bb).add_dest_op(opcode, oparg, &regs);
            }

            Opcode::UnpackSequence => {
                let seq = stack.pop()?;
                // Reverse element order so that subsequent pops retrieve
                // element 0 first.
                for k in (1..=oparg).rev() {
                    let elt = program.next_reg();
                    stack.push(elt)?;
                    program
                        .block_mut(bb)
                        .add_dest_op(Opcode::ConstIndex, k - 1, &[seq, elt]);
                }
            }

            // ===== Loop blocks =====
            Opcode::SetupLoop => {
                stack.push_frame(offset + size + oparg as usize)?;
                program.block_mut(bb).add_op(opcode, oparg, &[]);
            }
            Opcode::PopBlock => {
                stack.pop_frame()?;
            }
            Opcode::BreakLoop => {
                let frame = stack.pop_frame()?;
                program.block_mut(bb).add_op(opcode, oparg, &[]);
                let target = registerize(program, stack, frame.target)?;
                program.block_mut(bb).exits.push(target);
                return Ok(entry_point.unwrap_or(bb));
            }
            Opcode::ContinueLoop => {
                stack.pop_frame()?;
                program.block_mut(bb).add_op(opcode, oparg, &[]);
                let target = registerize(program, stack, oparg as usize)?;
                program.block_mut(bb).exits.push(target);
                // Ends the linear walk the same way BREAK_LOOP does.
                return Ok(entry_point.unwrap_or(bb));
            }

            Opcode::RaiseVarargs => {
                let mut r1 = NO_REG;
                let mut r2 = NO_REG;
                let mut r3 = NO_REG;
                if oparg >= 1 {
                    r1 = stack.pop()?;
                }
                if oparg >= 2 {
                    r2 = stack.pop()?;
                }
                if oparg >= 3 {
                    r3 = stack.pop()?;
                }
                program.block_mut(bb).add_op(opcode, oparg, &[r1, r2, r3]);
            }

            // ===== Print statement =====
            Opcode::PrintItem => {
                let value = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[value]);
            }
            Opcode::PrintItemTo => {
                let stream = stack.pop()?;
                let value = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[stream, value]);
            }
            Opcode::PrintNewline => {
                program.block_mut(bb).add_op(opcode, oparg, &[]);
            }
            Opcode::PrintNewlineTo => {
                let stream = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[stream]);
            }

            // ===== Control flow: recurse down each branch with a copy of
            // the current stack =====
            Opcode::ForIter => {
                let iter = stack.pop()?;
                let mut has_item = stack.clone();
                let mut exhausted = stack.clone();
                // The iterator persists on the has-item side, followed by
                // the element it yields.
                has_item.push(iter)?;
                let elem = program.next_reg();
                has_item.push(elem)?;
                program.block_mut(bb).add_dest_op(opcode, 0, &[iter, elem]);

                let left = registerize(program, &mut has_item, offset + size)?;
                let right = registerize(program, &mut exhausted, offset + size + oparg as usize)?;
                let block = program.block_mut(bb);
                block.exits.push(left);
                block.exits.push(right);
                return Ok(entry_point.unwrap_or(bb));
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                // The operand is retained on the taken side and popped on
                // the fall-through side.
                let mut taken = stack.clone();
                let cond = stack.pop()?;
                let mut fall = stack.clone();
                program.block_mut(bb).add_op(opcode, oparg, &[cond]);

                let left = registerize(program, &mut fall, offset + size)?;
                let right = registerize(program, &mut taken, oparg as usize)?;
                let block = program.block_mut(bb);
                block.exits.push(left);
                block.exits.push(right);
                return Ok(entry_point.unwrap_or(bb));
            }
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let cond = stack.pop()?;
                let mut fall = stack.clone();
                let mut taken = stack.clone();
                program.block_mut(bb).add_op(opcode, oparg, &[cond]);

                let left = registerize(program, &mut fall, offset + size)?;
                let right = registerize(program, &mut taken, oparg as usize)?;
                let block = program.block_mut(bb);
                block.exits.push(left);
                block.exits.push(right);
                return Ok(entry_point.unwrap_or(bb));
            }
            Opcode::JumpForward => {
                let dst = offset + size + oparg as usize;
                program
                    .block_mut(bb)
                    .add_op(Opcode::JumpAbsolute, dst as u32, &[]);
                let target = registerize(program, stack, dst)?;
                program.block_mut(bb).exits.push(target);
                return Ok(entry_point.unwrap_or(bb));
            }
            Opcode::JumpAbsolute => {
                program.block_mut(bb).add_op(Opcode::JumpAbsolute, oparg, &[]);
                let target = registerize(program, stack, oparg as usize)?;
                program.block_mut(bb).exits.push(target);
                return Ok(entry_point.unwrap_or(bb));
            }
            Opcode::ReturnValue => {
                let value = stack.pop()?;
                program.block_mut(bb).add_op(opcode, oparg, &[value]);
                return Ok(entry_point.unwrap_or(bb));
            }

            // Exception handling, generators, closures and imports are left
            // to the stack interpreter.
            _ => {
                debug!(
                    "cannot registerize {} (arg {}) at offset {}",
                    opcode.name(),
                    oparg,
                    offset
                );
                return Err(RecompileError::UnsupportedOpcode(opcode.name()));
            }
        }

        offset += size;
    }

    entry_point.ok_or_else(|| {
        RecompileError::Invariant(format!("code walk reached offset {} past the end", offset))
    })
}
