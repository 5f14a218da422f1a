//! Kestrel Bytecode Definitions
//!
//! This crate provides the two instruction sets the recompiler mediates
//! between: the stack-machine opcode table consumed as input (with its
//! static classification oracle) and the register-machine wire format
//! produced as output.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod code;
pub mod opcode;
pub mod rmachine;

pub use code::CodeObject;
pub use opcode::{Opcode, HAVE_ARGUMENT};
pub use rmachine::{
    RMachineOp, RMachineWriter, RegisterPrelude, WireError, WireReg, BRANCH_LABEL_OFFSET,
    BRANCH_OP_SIZE, PRELUDE_SIZE, REGULAR_OP_SIZE, REG_ABSENT, REG_MAGIC, VARARGS_BASE_SIZE,
};
