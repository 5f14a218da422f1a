//! End-to-end recompilation tests
//!
//! Assembles small stack-machine programs, runs them through the full
//! pipeline, and checks the resulting IR and register code.

use kestrel_bytecode::{
    CodeObject, Opcode, RMachineOp, RegisterPrelude, PRELUDE_SIZE, REG_ABSENT,
};
use kestrel_compiler::optimize::{
    BackwardPass, DeadCodeElim, FuseBlocks, MarkEntries, Pass, StoreElim,
};
use kestrel_compiler::{compile, compile_to_ir, lower, optimize, Program, RecompileError};

/// Tiny assembler for source bytecode
struct Asm {
    bytes: Vec<u8>,
}

impl Asm {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    fn op(mut self, code: Opcode) -> Self {
        assert!(!code.has_arg());
        self.bytes.push(code.to_u8());
        self
    }

    fn op_arg(mut self, code: Opcode, arg: u16) -> Self {
        assert!(code.has_arg());
        self.bytes.push(code.to_u8());
        self.bytes.extend_from_slice(&arg.to_le_bytes());
        self
    }

    fn code(self, num_consts: u32, num_locals: u32) -> CodeObject {
        CodeObject::new(self.bytes, num_consts, num_locals)
    }
}

/// Decode every instruction of a lowered program, checking that the sizes
/// tile the buffer exactly.
fn decode_ops(bytes: &[u8]) -> Vec<(usize, RMachineOp)> {
    RegisterPrelude::read_from(bytes).unwrap();
    let mut ops = Vec::new();
    let mut pos = PRELUDE_SIZE;
    while pos < bytes.len() {
        assert_eq!(
            RMachineOp::size_at(bytes, pos).unwrap(),
            RMachineOp::decode(bytes, pos).unwrap().size()
        );
        let op = RMachineOp::decode(bytes, pos).unwrap();
        let size = op.size();
        ops.push((pos, op));
        pos += size;
    }
    assert_eq!(pos, bytes.len());
    ops
}

fn flat_ops(program: &Program) -> Vec<&kestrel_compiler::ir::Op> {
    program
        .blocks
        .iter()
        .flat_map(|block| block.code.iter())
        .collect()
}

/// Every register named anywhere stays inside `[-1, num_reg)`.
fn assert_register_bounds(program: &Program) {
    for op in flat_ops(program) {
        for &reg in &op.regs {
            assert!(reg >= -1 && reg < program.num_reg, "register {} escapes", reg);
        }
    }
}

// ===== Scenario: constant add =====

fn constant_add() -> CodeObject {
    Asm::new()
        .op_arg(Opcode::LoadConst, 0)
        .op_arg(Opcode::LoadConst, 1)
        .op(Opcode::BinaryAdd)
        .op(Opcode::ReturnValue)
        .code(2, 0)
}

#[test]
fn test_constant_add_ir() {
    let program = compile_to_ir(&constant_add()).unwrap();
    let ops = flat_ops(&program);
    assert_eq!(ops.len(), 4);
    // Temporaries are numbered from num_consts + num_locals.
    assert_eq!(ops[0].regs, vec![0, 2]);
    assert_eq!(ops[1].regs, vec![1, 3]);
    assert_eq!(ops[2].regs, vec![3, 2, 4]);
    assert_eq!(ops[3].regs, vec![4]);
    assert_register_bounds(&program);
}

#[test]
fn test_constant_add_loads_survive_without_copy_prop() {
    // Store elimination cannot fuse through BINARY_ADD (it is not a move)
    // and the loads still feed it, so without copy propagation nothing dies.
    let mut program = compile_to_ir(&constant_add()).unwrap();
    MarkEntries.run(&mut program);
    FuseBlocks.run(&mut program);
    StoreElim::default().run(&mut program);
    DeadCodeElim::default().run(&mut program);

    let ops = flat_ops(&program);
    assert_eq!(ops.len(), 4);
}

#[test]
fn test_constant_add_full_pipeline() {
    // Copy propagation lets the add read the constant registers directly,
    // after which both loads are dead.
    let mut program = compile_to_ir(&constant_add()).unwrap();
    optimize(&mut program);

    assert_eq!(program.blocks.len(), 1);
    let ops = flat_ops(&program);
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].code, Opcode::BinaryAdd);
    assert_eq!(ops[0].regs, vec![1, 0, 4]);
    assert_eq!(ops[1].code, Opcode::ReturnValue);
    assert_eq!(ops[1].regs, vec![4]);
    assert!(program.blocks[0].exits.is_empty());
}

// ===== Scenario: if/else =====

fn if_else() -> CodeObject {
    Asm::new()
        .op_arg(Opcode::LoadFast, 0) // 0
        .op_arg(Opcode::PopJumpIfFalse, 10) // 3
        .op_arg(Opcode::LoadConst, 1) // 6
        .op(Opcode::ReturnValue) // 9
        .op_arg(Opcode::LoadConst, 2) // 10
        .op(Opcode::ReturnValue) // 13
        .code(3, 1)
}

#[test]
fn test_if_else_cfg_shape() {
    let program = compile_to_ir(&if_else()).unwrap();
    // The conditional block has the fall-through first and the taken branch
    // second.
    let cond = program.block_at_offset(3);
    let block = &program.blocks[cond];
    assert_eq!(block.exits.len(), 2);
    assert_eq!(program.blocks[block.exits[0].0].py_offset, 6);
    assert_eq!(program.blocks[block.exits[1].0].py_offset, 10);
}

#[test]
fn test_if_else_lowering() {
    let mut program = compile_to_ir(&if_else()).unwrap();
    optimize(&mut program);
    // The conditional cannot fuse with either successor.
    assert_eq!(program.blocks.len(), 3);

    let bytes = lower(&mut program).unwrap();
    let ops = decode_ops(&bytes);
    assert_eq!(ops.len(), 3);

    // The branch reads the local directly and targets the taken block;
    // the fall-through block starts right after the branch.
    let (pos, jump) = &ops[0];
    assert_eq!(*pos, PRELUDE_SIZE);
    assert_eq!(
        *jump,
        RMachineOp::Branch {
            code: Opcode::PopJumpIfFalse,
            arg: 10,
            regs: [3, REG_ABSENT],
            label: program.blocks[2].reg_offset as u32,
        }
    );
    assert_eq!(ops[1].0, program.blocks[1].reg_offset);
    assert_eq!(program.blocks[1].reg_offset, PRELUDE_SIZE + 11);

    // Both arms collapse to a bare return of a constant register.
    assert_eq!(
        ops[1].1,
        RMachineOp::Branch {
            code: Opcode::ReturnValue,
            arg: 0,
            regs: [1, REG_ABSENT],
            label: 0,
        }
    );
    assert_eq!(
        ops[2].1,
        RMachineOp::Branch {
            code: Opcode::ReturnValue,
            arg: 0,
            regs: [2, REG_ABSENT],
            label: 0,
        }
    );
}

// ===== Scenario: while loop =====

fn while_loop() -> CodeObject {
    Asm::new()
        .op_arg(Opcode::SetupLoop, 9) // 0, block ends at 12
        .op_arg(Opcode::LoadFast, 0) // 3
        .op_arg(Opcode::PopJumpIfFalse, 12) // 6
        .op_arg(Opcode::JumpAbsolute, 3) // 9
        .op(Opcode::PopBlock) // 12
        .op_arg(Opcode::LoadConst, 0) // 13
        .op(Opcode::ReturnValue) // 16
        .code(1, 1)
}

#[test]
fn test_while_loop_reuses_head_block() {
    let program = compile_to_ir(&while_loop()).unwrap();
    let heads = program
        .blocks
        .iter()
        .filter(|block| block.py_offset == 3)
        .count();
    assert_eq!(heads, 1);
    assert_register_bounds(&program);
}

#[test]
fn test_while_loop_lowering() {
    let mut program = compile_to_ir(&while_loop()).unwrap();
    optimize(&mut program);
    let bytes = lower(&mut program).unwrap();
    let ops = decode_ops(&bytes);

    assert_eq!(ops.len(), 4);
    assert_eq!(ops[0].1.code(), Opcode::SetupLoop);
    assert_eq!(ops[1].1.code(), Opcode::PopJumpIfFalse);
    assert_eq!(ops[2].1.code(), Opcode::JumpAbsolute);
    assert_eq!(ops[3].1.code(), Opcode::ReturnValue);

    // The back edge targets the loop head, the conditional targets the exit
    // block after the loop.
    let RMachineOp::Branch { label: back, .. } = &ops[2].1 else {
        panic!("expected branch");
    };
    assert_eq!(*back as usize, ops[1].0);
    let RMachineOp::Branch { label: out, .. } = &ops[1].1 else {
        panic!("expected branch");
    };
    assert_eq!(*out as usize, ops[3].0);
}

// ===== Scenario: for-iter =====

fn for_loop() -> CodeObject {
    Asm::new()
        .op_arg(Opcode::LoadFast, 0) // 0
        .op(Opcode::GetIter) // 3
        .op_arg(Opcode::ForIter, 6) // 4: has-item at 7, exhausted at 13
        .op_arg(Opcode::StoreFast, 1) // 7
        .op_arg(Opcode::JumpAbsolute, 4) // 10
        .op_arg(Opcode::LoadConst, 0) // 13
        .op(Opcode::ReturnValue) // 16
        .code(1, 2)
}

#[test]
fn test_for_iter_stack_shapes() {
    let program = compile_to_ir(&for_loop()).unwrap();

    // FOR_ITER consumes the iterator register and defines the element.
    let iter_block = &program.blocks[program.block_at_offset(4)];
    let for_iter = &iter_block.code[0];
    assert_eq!(for_iter.code, Opcode::ForIter);
    assert_eq!(for_iter.regs, vec![4, 5]);
    assert!(for_iter.has_dest);
    assert_eq!(iter_block.exits.len(), 2);

    // On the has-item side the element sits on top of the retained
    // iterator: the body's store pops the element.
    let body = &program.blocks[program.block_at_offset(7)];
    assert_eq!(body.code[0].code, Opcode::StoreFast);
    assert_eq!(body.code[0].regs[0], 5);

    // The exhausted side continues with the pre-iterator stack.
    let exit = &program.blocks[program.block_at_offset(13)];
    assert_eq!(exit.code[0].code, Opcode::LoadFast);
}

#[test]
fn test_for_iter_lowering() {
    let mut program = compile_to_ir(&for_loop()).unwrap();
    optimize(&mut program);
    let bytes = lower(&mut program).unwrap();
    let ops = decode_ops(&bytes);

    assert_eq!(ops[0].1.code(), Opcode::GetIter);
    let RMachineOp::Branch {
        code: Opcode::ForIter,
        regs,
        label,
        ..
    } = &ops[1].1
    else {
        panic!("expected FOR_ITER branch");
    };
    assert_eq!(*regs, [4, 5]);
    // Exhaustion jumps past the loop; the body falls through.
    assert_eq!(*label as usize, ops.last().unwrap().0);
    assert_eq!(ops.last().unwrap().1.code(), Opcode::ReturnValue);
}

// ===== Scenario: dead pure load =====

#[test]
fn test_dead_load_eliminated_decref_retained() {
    let code = Asm::new()
        .op_arg(Opcode::LoadConst, 1)
        .op_arg(Opcode::LoadConst, 0)
        .op(Opcode::PopTop)
        .op(Opcode::ReturnValue)
        .code(2, 0);

    let mut program = compile_to_ir(&code).unwrap();
    optimize(&mut program);

    let ops = flat_ops(&program);
    assert_eq!(ops.len(), 2);
    // The discarded value still gets its reference released, reading the
    // constant register directly; both loads are gone.
    assert_eq!(ops[0].code, Opcode::Decref);
    assert_eq!(ops[0].regs, vec![0]);
    assert_eq!(ops[1].code, Opcode::ReturnValue);
    assert_eq!(ops[1].regs, vec![1]);
}

// ===== Failure channel =====

#[test]
fn test_exception_constructs_fall_back() {
    for opcode in [
        Opcode::SetupExcept,
        Opcode::SetupFinally,
        Opcode::ContinueLoop, // outside any loop frame this underflows
    ] {
        let code = Asm::new().op_arg(opcode, 0).code(0, 0);
        assert!(compile(&code).is_err(), "{} accepted", opcode.name());
    }

    let code = Asm::new().op(Opcode::YieldValue).code(0, 0);
    let err = compile(&code).unwrap_err();
    assert!(err.is_unsupported());
    assert!(err.to_string().contains("YIELD_VALUE"));
}

#[test]
fn test_stack_limit_is_unsupported() {
    let mut asm = Asm::new();
    for _ in 0..257 {
        asm = asm.op_arg(Opcode::LoadConst, 0);
    }
    let code = asm.op(Opcode::ReturnValue).code(1, 0);
    let err = compile(&code).unwrap_err();
    assert!(matches!(err, RecompileError::StackLimit));
    assert!(err.is_unsupported());
}

#[test]
fn test_frame_limit_is_unsupported() {
    let mut asm = Asm::new();
    for _ in 0..33 {
        asm = asm.op_arg(Opcode::SetupLoop, 0);
    }
    let code = asm.code(0, 0);
    let err = compile(&code).unwrap_err();
    assert!(matches!(err, RecompileError::FrameLimit));
}

// ===== Quantified properties =====

#[test]
fn test_branch_labels_land_on_block_starts() {
    for code in [if_else(), while_loop(), for_loop()] {
        let mut program = compile_to_ir(&code).unwrap();
        optimize(&mut program);
        let bytes = lower(&mut program).unwrap();

        let starts: Vec<usize> = program.blocks.iter().map(|b| b.reg_offset).collect();
        for (_, op) in decode_ops(&bytes) {
            if let RMachineOp::Branch { code, label, .. } = op {
                if code == Opcode::ReturnValue {
                    assert_eq!(label, 0);
                } else {
                    assert!(label > 0);
                    assert!(
                        starts.contains(&(label as usize)),
                        "label {} is not a block start",
                        label
                    );
                }
            }
        }
    }
}

#[test]
fn test_registers_stay_bounded_through_optimization() {
    for code in [constant_add(), if_else(), while_loop(), for_loop()] {
        let mut program = compile_to_ir(&code).unwrap();
        assert_register_bounds(&program);
        optimize(&mut program);
        assert_register_bounds(&program);
    }
}

#[test]
fn test_pipeline_is_idempotent() {
    for code in [constant_add(), if_else(), while_loop(), for_loop()] {
        let mut program = compile_to_ir(&code).unwrap();
        optimize(&mut program);
        let once = lower(&mut program).unwrap();
        optimize(&mut program);
        let twice = lower(&mut program).unwrap();
        assert_eq!(once, twice);
    }
}

#[test]
fn test_prelude_reports_register_count() {
    let code = constant_add();
    let program = compile_to_ir(&code).unwrap();
    let bytes = compile(&code).unwrap();
    let prelude = RegisterPrelude::read_from(&bytes).unwrap();
    assert_eq!(prelude.num_registers as i32, program.num_reg);
    assert_eq!(prelude.num_registers, 5);
}

// ===== helpers on Program used by these tests =====

trait BlockAt {
    fn block_at_offset(&self, offset: usize) -> usize;
}

impl BlockAt for Program {
    fn block_at_offset(&self, offset: usize) -> usize {
        self.blocks
            .iter()
            .position(|block| block.py_offset == offset)
            .expect("no block at offset")
    }
}
