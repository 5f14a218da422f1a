//! Textual IR dump
//!
//! Human-readable rendering of the block graph for debugging and tracing.

use super::Program;
use std::fmt;

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "bb_{}: ", block.idx)?;
            for op in &block.code {
                write!(f, "\n  {}", op)?;
            }
            write!(f, "\n -> ")?;
            for (i, exit) in block.exits.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "bb_{}", self.blocks[exit.0].idx)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
