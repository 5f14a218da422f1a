//! Input code objects
//!
//! The recompiler consumes a compiled function as a linear stack-machine
//! byte string plus the sizes of its constant pool and local-variable table.

use crate::opcode::HAVE_ARGUMENT;

/// A compiled stack-machine function, as handed over by the front-end.
#[derive(Debug, Clone)]
pub struct CodeObject {
    /// Linear stack-machine instruction stream
    pub code: Vec<u8>,
    /// Number of constant pool entries
    pub num_consts: u32,
    /// Number of named local-variable slots
    pub num_locals: u32,
}

impl CodeObject {
    /// Create a code object from raw bytecode and table sizes
    pub fn new(code: Vec<u8>, num_consts: u32, num_locals: u32) -> Self {
        Self {
            code,
            num_consts,
            num_locals,
        }
    }

    /// Decode the little-endian immediate of the instruction at `offset`.
    ///
    /// The caller must have checked that the opcode carries an immediate and
    /// that two operand bytes follow.
    #[inline]
    pub fn arg_at(&self, offset: usize) -> u32 {
        arg_at(&self.code, offset)
    }
}

/// Decode the immediate of the instruction at `offset` in a raw byte stream.
#[inline]
pub fn arg_at(code: &[u8], offset: usize) -> u32 {
    u32::from(code[offset + 1]) | (u32::from(code[offset + 2]) << 8)
}

/// Does the raw opcode byte at the front of an instruction carry an
/// immediate?
#[inline]
pub fn byte_has_arg(byte: u8) -> bool {
    byte >= HAVE_ARGUMENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[test]
    fn test_arg_decoding() {
        let code = CodeObject::new(vec![Opcode::LoadConst.to_u8(), 0x34, 0x12], 1, 0);
        assert_eq!(code.arg_at(0), 0x1234);
    }

    #[test]
    fn test_arg_decoding_mid_stream() {
        let code = CodeObject::new(
            vec![
                Opcode::PopTop.to_u8(),
                Opcode::LoadFast.to_u8(),
                0x07,
                0x00,
            ],
            0,
            8,
        );
        assert_eq!(code.arg_at(1), 7);
    }

    #[test]
    fn test_byte_has_arg() {
        assert!(!byte_has_arg(Opcode::ReturnValue.to_u8()));
        assert!(byte_has_arg(Opcode::StoreName.to_u8()));
    }
}
