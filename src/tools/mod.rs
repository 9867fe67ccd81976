//! Wrappers around the external compiler tools

pub mod build;
pub mod compiler;
pub mod process;
pub mod verifier;

pub use build::Builder;
pub use compiler::Compiler;
pub use verifier::Verifier;
