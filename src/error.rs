//! Crate-wide error type.
//!
//! Recoverable analysis conditions (unresolved calls, non-convergent loops,
//! malformed references) are *findings*, not errors — see [`crate::report`].
//! `FlowError` is reserved for programming-contract failures and structurally
//! unusable input: conditions a correct caller/engine pair never produces.

use crate::program::types::SymbolId;

/// Errors surfaced by the analysis engine.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The input program graph is structurally unusable (e.g. a cycle in the
    /// class hierarchy). Dangling references are NOT this — those are
    /// recovered locally and reported as findings.
    #[error("malformed program: {0}")]
    MalformedProgram(String),

    /// A lattice value decreased between fixed-point iterations, or a block
    /// id escaped its CFG. These indicate a bug in the engine itself.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    /// A symbol id with no entry in the program graph reached the engine.
    #[error("unknown symbol id {0:?}")]
    UnknownSymbol(SymbolId),

    /// A summary was published twice for the same symbol. Summaries are
    /// write-once per SCC stabilization.
    #[error("summary for `{0}` published twice")]
    DuplicateSummary(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;
