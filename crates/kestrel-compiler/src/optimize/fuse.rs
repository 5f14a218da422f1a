//! Entry marking and basic-block fusion
//!
//! Registerization produces one block per translated instruction; fusion
//! splices single-entry/single-exit chains back into straight-line blocks.
//! Entry marking must run first so fusion can see predecessor counts.

use super::Pass;
use crate::ir::{BlockId, Program};

/// Populate every block's predecessor list
pub struct MarkEntries;

impl Pass for MarkEntries {
    fn prepare(&mut self, program: &mut Program) {
        // Recomputed from scratch so the pipeline can run repeatedly.
        for block in &mut program.blocks {
            block.entries.clear();
        }
    }

    fn visit_block(&mut self, program: &mut Program, id: BlockId) {
        let exits = program.block(id).exits.clone();
        for exit in exits {
            program.block_mut(exit).entries.push(id);
        }
    }
}

/// Splice single-predecessor successors onto their predecessor
pub struct FuseBlocks;

impl Pass for FuseBlocks {
    fn visit_block(&mut self, program: &mut Program, id: BlockId) {
        if program.block(id).exits.len() != 1 {
            return;
        }
        let mut next = program.block(id).exits[0];
        loop {
            if next == id {
                // A block cannot absorb itself.
                break;
            }
            {
                let candidate = program.block(next);
                if candidate.entries.len() > 1 || candidate.visited {
                    break;
                }
            }

            let (code, exits) = {
                let candidate = program.block_mut(next);
                candidate.dead = true;
                candidate.visited = true;
                (
                    std::mem::take(&mut candidate.code),
                    std::mem::take(&mut candidate.exits),
                )
            };
            let block = program.block_mut(id);
            block.code.extend(code);
            block.exits = exits;

            if block.exits.len() != 1 {
                break;
            }
            next = block.exits[0];
        }
    }
}
