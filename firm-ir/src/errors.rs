//! Error and verification reporting.
//!
//! Three kinds of failure exist and they are deliberately kept apart:
//!
//! 1. Programmer contract violations (mode mismatch on an input, wrong
//!    arity, reading an unset variable slot). These are bugs in the caller
//!    and abort with a diagnostic naming the offending node; they are
//!    `debug_assert!`/`panic!`, never `Err`.
//! 2. Verification failures found by post-pass invariant checks. These are
//!    collected into [`VerifierErrors`] and handled according to the
//!    configured [`VerifyLevel`].
//! 3. Degenerate but legal inputs (dead code, unreachable blocks, methods
//!    without graphs). These produce `Bad`/empty results and never surface
//!    here at all.

use core::fmt;
use thiserror::Error;

use crate::ir::Node;

/// A verification diagnostic tied to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierError {
    /// The offending node.
    pub node: Node,
    /// What was wrong with it.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.message)
    }
}

/// A list of verification diagnostics collected by one checker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// Record a diagnostic for `node`.
    pub fn report(&mut self, node: Node, message: impl Into<String>) {
        self.0.push(VerifierError {
            node,
            message: message.into(),
        });
    }

    /// Return `true` if no diagnostics have been reported.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for e in &self.0 {
            writeln!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// How strictly a pipeline step checks its postconditions.
///
/// Every backend step can be run with verification off, as a warning pass
/// that logs and continues, or as a hard assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyLevel {
    /// Do not verify.
    Off,
    /// Verify; log diagnostics and continue.
    Warn,
    /// Verify; fail the pipeline on any diagnostic.
    Assert,
}

impl Default for VerifyLevel {
    fn default() -> Self {
        VerifyLevel::Warn
    }
}

/// An error from a compilation pipeline entry point.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A verifier ran at [`VerifyLevel::Assert`] and found problems.
    #[error("verifier errors:\n{0}")]
    Verifier(VerifierErrors),

    /// A requested facility is not compiled in or not implemented for the
    /// target (e.g. the ILP copy minimizer).
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// A result type over [`CodegenError`].
pub type CodegenResult<T> = Result<T, CodegenError>;

impl VerifierErrors {
    /// Dispatch collected diagnostics according to `level`.
    ///
    /// Returns `Err` only for `Assert`; `Warn` logs every diagnostic.
    pub fn dispose(self, level: VerifyLevel, what: &str) -> CodegenResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        match level {
            VerifyLevel::Off => Ok(()),
            VerifyLevel::Warn => {
                for e in &self.0 {
                    log::warn!("{}: {}", what, e);
                }
                Ok(())
            }
            VerifyLevel::Assert => Err(CodegenError::Verifier(self)),
        }
    }
}
