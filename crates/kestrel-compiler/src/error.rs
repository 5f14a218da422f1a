//! Recompilation errors

use thiserror::Error;

/// Result alias used throughout the recompiler
pub type RecompileResult<T> = Result<T, RecompileError>;

/// Failure channel of the recompiler.
///
/// Two families: *unsupported* outcomes, which are expected and tell the
/// caller to fall back to the stack interpreter, and invariant violations,
/// which indicate malformed input or a bug and still abort the compilation
/// rather than miscompile.
#[derive(Debug, Error)]
pub enum RecompileError {
    /// A recognized opcode the recompiler does not translate
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(&'static str),

    /// A byte outside the opcode table
    #[error("unknown opcode byte {0:#04x}")]
    UnknownOpcode(u8),

    /// Symbolic operand stack exceeded its fixed capacity
    #[error("operand stack depth limit exceeded")]
    StackLimit,

    /// Loop nesting exceeded the fixed frame capacity
    #[error("loop nesting depth limit exceeded")]
    FrameLimit,

    /// Pop from an empty symbolic stack
    #[error("operand stack underflow")]
    StackUnderflow,

    /// Frame pop outside any loop
    #[error("loop frame underflow")]
    FrameUnderflow,

    /// Internal consistency violation detected during compilation
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl RecompileError {
    /// True for the recoverable outcomes: the function is valid but uses a
    /// construct (or a depth) the recompiler does not handle, and the caller
    /// should execute the original stack bytecode instead.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedOpcode(_) | Self::UnknownOpcode(_) | Self::StackLimit | Self::FrameLimit
        )
    }
}
