//! MLIR module - snapshot text to an arena tree and back

pub mod ir;
pub mod lexer;
pub mod parser;
pub mod printer;
