pub mod demangle;
pub mod elf;
pub mod jit_map;
pub mod kernel;
pub mod table;

pub use elf::ExecutableSymbolTable;
pub use jit_map::JitMapResolver;
pub use kernel::KernelSymbolTable;
