//! Session sink implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "fs")]
pub mod fs;

#[cfg(feature = "memory")]
pub use memory::MemorySink;

#[cfg(feature = "fs")]
pub use fs::FileSink;
