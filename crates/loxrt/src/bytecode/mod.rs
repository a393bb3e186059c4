//! Bytecode instruction set and per-function chunk container.

mod chunk;
mod opcode;

pub use chunk::{Chunk, MAX_CONSTANTS};
pub use opcode::Opcode;
