pub mod diagnostic;
pub mod driver;
pub mod emit;
pub mod engine;
pub mod lexeme;
pub mod lexer;
pub mod span;
pub mod symtab;

use diagnostic::Diagnostic;
use engine::{CompilationEngine, CompiledClass};
use lexer::Lexer;

/// Compile one Jack class from source text.
///
/// `basename` is the source file's stem; the declared class name must match
/// it. Fail-fast: the first lexical, syntactic, or semantic violation aborts
/// the unit.
pub fn compile_source(source: &str, basename: &str) -> Result<CompiledClass, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    CompilationEngine::new(basename, tokens).compile_class()
}
