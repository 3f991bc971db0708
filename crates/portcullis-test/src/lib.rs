//! Test harnesses for the Portcullis bundle compiler.
//!
//! Holds the CLI regression tests and the shared fixtures helpers they use.
//! Fixtures live in `tests/fixtures` at the workspace root.

#[cfg(test)]
pub mod cli;
