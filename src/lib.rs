//! Rill - a small scripting language with exact decimal arithmetic
//!
//! Source packages are lexed, parsed, and compiled into register bytecode,
//! cached as binary package artifacts, and executed by a register VM.

pub mod token;
pub mod lexer;
pub mod parser;
pub mod ast;
pub mod number;
pub mod types;
pub mod instruction;
pub mod compiler;
pub mod artifact;
pub mod builtins;
pub mod vm;
pub mod error;

pub use artifact::{Artifact, Store};
pub use ast::Literal;
pub use compiler::{compile, SourceSet};
pub use error::{Error, ErrorKind, Result};
pub use lexer::Lexer;
pub use number::Number;
pub use parser::Parser;
pub use types::Type;
pub use vm::VM;

/// Version of the rill language
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile and run `source` as a standalone `main` package, returning
/// whatever its `main` function returns. Artifacts go to a temporary
/// cache. Only the first compile error is reported; use [`compile`] for
/// the full list.
pub fn run_source(source: &str) -> Result<Vec<Literal>> {
    let mut sources = SourceSet::new();
    sources.insert("main", source);
    run_package(&sources, "main")
}

/// Compile `package` from `sources` (dependencies included) and call its
/// `main` function.
pub fn run_package(sources: &SourceSet, package: &str) -> Result<Vec<Literal>> {
    let store = Store::temporary();
    let artifact =
        compile(sources, package, false, &store).map_err(|mut errors| errors.remove(0))?;

    let mut vm = VM::new(store);
    vm.load_artifact(&artifact)?;
    vm.call(&format!("{}.main", artifact.alias()), vec![])
}
