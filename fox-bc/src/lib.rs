#![forbid(unsafe_code)]

mod gen;
mod module;
mod regalloc;

pub use gen::generate_module;
pub use module::{
    BytecodeModule, ConstantPool, FunctionEntry, GlobalEntry, Instr, TypeTag,
};
pub use regalloc::{RegisterAllocator, RegisterValue, NUM_REGISTERS};
