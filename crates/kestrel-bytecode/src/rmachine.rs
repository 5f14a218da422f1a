//! Register-machine wire format
//!
//! The recompiler's output: a fixed prelude followed by variable-length
//! register instructions. All multi-byte fields are little-endian. Register
//! slots are 16-bit and signed; `-1` marks an unused slot.
//!
//! Instruction shapes, discriminated by the opcode table:
//! - regular:  `code:u8, arg:u16, reg_1:i16, reg_2:i16, reg_3:i16`
//! - branch:   `code:u8, arg:u16, reg_1:i16, reg_2:i16, label:u32`
//! - varargs:  `code:u8, arg:u16, num_registers:u16, regs:[i16; n]`

use crate::opcode::Opcode;
use thiserror::Error;

/// Register slot representation on the wire
pub type WireReg = i16;

/// Wire value marking an unused register slot
pub const REG_ABSENT: WireReg = -1;

/// Magic bytes opening every lowered program
pub const REG_MAGIC: [u8; 4] = *b"kreg";

/// Size of the prelude in bytes
pub const PRELUDE_SIZE: usize = 12;

/// Size of a regular (three-register) instruction
pub const REGULAR_OP_SIZE: usize = 9;

/// Size of a branch instruction
pub const BRANCH_OP_SIZE: usize = 11;

/// Size of a varargs instruction before its register payload
pub const VARARGS_BASE_SIZE: usize = 5;

/// Byte offset of the label field inside a branch instruction
pub const BRANCH_LABEL_OFFSET: usize = 7;

/// Errors raised while decoding a lowered instruction stream
#[derive(Debug, Error)]
pub enum WireError {
    /// The stream ended inside an instruction or the prelude
    #[error("unexpected end of register code at offset {0}")]
    UnexpectedEnd(usize),

    /// An opcode byte outside the instruction table
    #[error("invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// The prelude's magic bytes did not match
    #[error("invalid magic number: expected {REG_MAGIC:?}, got {0:?}")]
    InvalidMagic([u8; 4]),
}

// ============================================================================
// Prelude
// ============================================================================

/// Fixed header at the front of every lowered program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPrelude {
    /// Magic bytes, always [`REG_MAGIC`]
    pub magic: [u8; 4],
    /// Reserved for the executing interpreter; written as zero
    pub mapped_registers: u16,
    /// Reserved for the executing interpreter; written as zero
    pub mapped_labels: u16,
    /// Total number of virtual registers the program addresses
    pub num_registers: u32,
}

impl RegisterPrelude {
    /// Create a prelude for a program using `num_registers` registers
    pub fn new(num_registers: u32) -> Self {
        Self {
            magic: REG_MAGIC,
            mapped_registers: 0,
            mapped_labels: 0,
            num_registers,
        }
    }

    /// Append the prelude to an output buffer
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&self.mapped_registers.to_le_bytes());
        out.extend_from_slice(&self.mapped_labels.to_le_bytes());
        out.extend_from_slice(&self.num_registers.to_le_bytes());
    }

    /// Decode a prelude from the front of a buffer
    pub fn read_from(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < PRELUDE_SIZE {
            return Err(WireError::UnexpectedEnd(buf.len()));
        }
        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != REG_MAGIC {
            return Err(WireError::InvalidMagic(magic));
        }
        Ok(Self {
            magic,
            mapped_registers: u16::from_le_bytes([buf[4], buf[5]]),
            mapped_labels: u16::from_le_bytes([buf[6], buf[7]]),
            num_registers: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

// ============================================================================
// Decoded instructions
// ============================================================================

/// A decoded register-machine instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RMachineOp {
    /// Fixed three-register shape
    Regular {
        /// Opcode
        code: Opcode,
        /// Immediate
        arg: u16,
        /// Register slots, unused ones `-1`
        regs: [WireReg; 3],
    },
    /// Branch shape with an absolute label
    Branch {
        /// Opcode
        code: Opcode,
        /// Immediate
        arg: u16,
        /// Register slots, unused ones `-1`
        regs: [WireReg; 2],
        /// Absolute byte offset of the target block start
        label: u32,
    },
    /// Variable-length register list
    Varargs {
        /// Opcode
        code: Opcode,
        /// Immediate
        arg: u16,
        /// All register operands, destination last
        regs: Vec<WireReg>,
    },
}

impl RMachineOp {
    /// Opcode of this instruction
    pub fn code(&self) -> Opcode {
        match self {
            Self::Regular { code, .. } | Self::Branch { code, .. } | Self::Varargs { code, .. } => {
                *code
            }
        }
    }

    /// Immediate of this instruction
    pub fn arg(&self) -> u16 {
        match self {
            Self::Regular { arg, .. } | Self::Branch { arg, .. } | Self::Varargs { arg, .. } => {
                *arg
            }
        }
    }

    /// Encoded size of this instruction in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Regular { .. } => REGULAR_OP_SIZE,
            Self::Branch { .. } => BRANCH_OP_SIZE,
            Self::Varargs { regs, .. } => VARARGS_BASE_SIZE + 2 * regs.len(),
        }
    }

    /// Recover the size of the instruction starting at `pos` without fully
    /// decoding it. For varargs shapes the embedded register count supplies
    /// the length.
    pub fn size_at(buf: &[u8], pos: usize) -> Result<usize, WireError> {
        let byte = *buf.get(pos).ok_or(WireError::UnexpectedEnd(pos))?;
        let code = Opcode::from_u8(byte).ok_or(WireError::InvalidOpcode(byte, pos))?;
        let size = if code.is_varargs() {
            if pos + VARARGS_BASE_SIZE > buf.len() {
                return Err(WireError::UnexpectedEnd(pos));
            }
            let n = u16::from_le_bytes([buf[pos + 3], buf[pos + 4]]) as usize;
            VARARGS_BASE_SIZE + 2 * n
        } else if code.is_branch() {
            BRANCH_OP_SIZE
        } else {
            REGULAR_OP_SIZE
        };
        if pos + size > buf.len() {
            return Err(WireError::UnexpectedEnd(pos));
        }
        Ok(size)
    }

    /// Decode the instruction starting at `pos`
    pub fn decode(buf: &[u8], pos: usize) -> Result<Self, WireError> {
        // Bounds for the whole instruction are established up front.
        let _ = Self::size_at(buf, pos)?;
        let byte = buf[pos];
        let code = Opcode::from_u8(byte).ok_or(WireError::InvalidOpcode(byte, pos))?;
        let arg = u16::from_le_bytes([buf[pos + 1], buf[pos + 2]]);

        let read_reg = |at: usize| WireReg::from_le_bytes([buf[at], buf[at + 1]]);

        if code.is_varargs() {
            let n = u16::from_le_bytes([buf[pos + 3], buf[pos + 4]]) as usize;
            let regs = (0..n)
                .map(|i| read_reg(pos + VARARGS_BASE_SIZE + 2 * i))
                .collect();
            Ok(Self::Varargs { code, arg, regs })
        } else if code.is_branch() {
            Ok(Self::Branch {
                code,
                arg,
                regs: [read_reg(pos + 3), read_reg(pos + 5)],
                label: u32::from_le_bytes([
                    buf[pos + 7],
                    buf[pos + 8],
                    buf[pos + 9],
                    buf[pos + 10],
                ]),
            })
        } else {
            Ok(Self::Regular {
                code,
                arg,
                regs: [read_reg(pos + 3), read_reg(pos + 5), read_reg(pos + 7)],
            })
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Append-only writer for lowered register code
///
/// Lowering emits through this and patches branch labels in place once every
/// block's final offset is known.
pub struct RMachineWriter {
    buffer: Vec<u8>,
}

impl RMachineWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Current write position (length of the buffer)
    #[inline]
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// The bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the finished buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Append the program prelude
    pub fn emit_prelude(&mut self, prelude: &RegisterPrelude) {
        prelude.write_to(&mut self.buffer);
    }

    /// Append a single byte
    #[inline]
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Append a little-endian u16
    #[inline]
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a register slot
    #[inline]
    pub fn emit_reg(&mut self, value: WireReg) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u32
    #[inline]
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Overwrite a previously emitted u32 at `pos`
    pub fn patch_u32(&mut self, pos: usize, value: u32) {
        self.buffer[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for RMachineWriter {
    fn default() -> Self {
        Self::new()
    }
}
