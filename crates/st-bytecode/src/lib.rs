//! The bytecode format shared by the compiler and the interpreter: the
//! opcode set, the in-memory encoding of an instruction stream, the
//! compiled-template artifact (`CompiledST`), and a disassembler.

pub mod compiled;
pub mod dump;
pub mod formal_argument;
pub mod module;
pub mod opcode;

pub use compiled::{CompiledST, RegionDefType};
pub use dump::disassemble;
pub use formal_argument::{DefaultValue, FormalArgument};
pub use module::{decode_at, iter_instructions, Assembler, DecodedInstruction};
pub use opcode::{InstructionMeta, Opcode, OperandType};
