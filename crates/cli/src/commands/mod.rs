//! Command implementations.

mod run;
mod validate;

pub use run::run_edge;
pub use validate::run_validate;
