//! Kestrel Recompiler - Stack Bytecode to Register Bytecode
//!
//! This crate translates conventional stack-machine bytecode into the
//! compact register form executed by the register interpreter.
//!
//! # Architecture
//!
//! The recompilation pipeline is:
//! 1. Registerization: abstract interpretation of the stack bytecode over a
//!    symbolic stack of register names, producing a control-flow graph of
//!    basic blocks
//! 2. Optimization: entry marking, block fusion, copy propagation, store
//!    elimination, dead-code elimination
//! 3. Lowering: two-pass serialization with branch-label back-patching
//!
//! A function using constructs the recompiler does not handle (exception
//! handlers, generators, closures, imports) fails with a recoverable
//! "unsupported" error and the caller runs the original stack bytecode
//! instead.

pub mod error;
pub mod ir;
pub mod lower;
pub mod optimize;
pub mod registerize;
pub mod stack;

pub use error::{RecompileError, RecompileResult};
pub use ir::Program;
pub use lower::lower;
pub use optimize::optimize;
pub use registerize::registerize;
pub use stack::{SymStack, REG_MAX_FRAMES, REG_MAX_STACK};

// Re-export the input/output vocabulary for convenience
pub use kestrel_bytecode::{CodeObject, Opcode};

use tracing::debug;

/// Registerize a code object without optimizing or lowering it, for
/// inspection and debugging.
pub fn compile_to_ir(code: &CodeObject) -> RecompileResult<Program> {
    let mut program = Program::new(code);
    let mut stack = SymStack::new();
    match registerize(&mut program, &mut stack, 0) {
        Ok(_) => Ok(program),
        Err(err) => {
            debug!("failed to registerize, falling back to the stack machine: {err}");
            Err(err)
        }
    }
}

/// Recompile a code object to register bytecode.
///
/// Returns the serialized register program, or an error describing why the
/// function cannot be recompiled. No partial output is ever produced.
pub fn compile(code: &CodeObject) -> RecompileResult<Vec<u8>> {
    let mut program = compile_to_ir(code)?;
    optimize(&mut program);
    lower(&mut program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_bytecode::REG_MAGIC;

    #[test]
    fn test_compile_emits_prelude() {
        let code = CodeObject::new(
            vec![
                Opcode::LoadConst.to_u8(),
                0,
                0,
                Opcode::ReturnValue.to_u8(),
            ],
            1,
            0,
        );
        let bytes = compile(&code).unwrap();
        assert_eq!(bytes[..4], REG_MAGIC);
    }

    #[test]
    fn test_unsupported_function_is_reported() {
        let code = CodeObject::new(vec![Opcode::SetupFinally.to_u8(), 0, 0], 0, 0);
        let err = compile(&code).unwrap_err();
        assert!(err.is_unsupported());
        assert!(err.to_string().contains("SETUP_FINALLY"));
    }
}
