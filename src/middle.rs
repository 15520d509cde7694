//! The middle end: lowers a checked AST to the SSA IR (`ir`), then runs the
//! pass pipeline the back end needs before it can emit assembly.
//!
//! Pass order (see `back::codegen::compile` for the actual driver):
//! `build` -> `cfg` (dominance) -> `mem2reg` -> `liveness` -> `regalloc`
//! (which loops internally on spill) -> `critical_edge` -> `phi_elim`.
//! Each module's doc comment states the invariants it assumes and the ones
//! it re-establishes, so a pass can be read in isolation from its neighbors.

pub mod ir;
pub mod build;
pub mod cfg;
pub mod mem2reg;
pub mod liveness;
pub mod regalloc;
pub mod critical_edge;
pub mod phi_elim;

pub use build::{build, BuildError};
