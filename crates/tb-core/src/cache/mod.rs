//! Compiled rule list cache format
//!
//! Binary container used to persist a compiled rule list next to the
//! identifier it was compiled for, so a cold start can reuse it without
//! recompiling.

mod format;
mod loader;

pub use format::*;
pub use loader::*;
