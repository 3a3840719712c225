//! Compiler for the Sub scripting language.
//!
//! The pipeline is strictly linear: lexer → parser → type checker → IR
//! lowerer → x86-64 emitter. Transpiler back-ends branch off after the type
//! checker and stringify the AST directly.

pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;
pub mod transpile;
pub mod typeck;
pub mod types;

use codegen::{Platform, X86Emitter};
use diagnostic::Diagnostic;
use ir::lower::lower_program;
use lexer::Lexer;
use parser::Parser;
use span::Span;
use typeck::TypeChecker;

/// Options resolved by the driver and passed down to compilation.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub platform: Platform,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            platform: Platform::host(),
        }
    }
}

/// Lex and parse a source string. Lexing always completes; any lex error
/// fails the pipeline before parsing, and parse errors return the collected
/// diagnostics.
pub fn parse_source(source: &str) -> Result<ast::Program, Vec<Diagnostic>> {
    let (tokens, lex_errors) = Lexer::new(source).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    let (program, parse_errors) = Parser::new(tokens).parse_program();
    if !parse_errors.is_empty() {
        return Err(parse_errors);
    }
    Ok(program)
}

/// Run the front half of the pipeline: lex, parse, type check.
/// `Ok` carries any warnings.
pub fn check_source(source: &str) -> Result<Vec<Diagnostic>, Vec<Diagnostic>> {
    let program = parse_source(source)?;
    TypeChecker::new().check_program(&program)
}

/// Compile a source string to x86-64 assembly text.
pub fn compile_to_asm(source: &str, options: &CompileOptions) -> Result<String, Vec<Diagnostic>> {
    let program = parse_source(source)?;
    TypeChecker::new().check_program(&program)?;
    let module = lower_program(&program)?;
    X86Emitter::new(options.platform).emit_module(&module)
}

/// Transpile a source string into the named target language.
pub fn transpile_source(
    source: &str,
    target: &str,
) -> Result<String, Vec<Diagnostic>> {
    let Some(backend) = transpile::create_backend(target) else {
        return Err(vec![Diagnostic::error(
            format!(
                "unknown target '{}'; supported targets are {}",
                target,
                transpile::known_targets().join(", ")
            ),
            Span::dummy(),
        )]);
    };
    let program = parse_source(source)?;
    TypeChecker::new().check_program(&program)?;
    match backend(&program, source) {
        Some(output) => Ok(output),
        None => Err(vec![Diagnostic::error(
            format!("the '{}' back-end cannot express this program", target),
            Span::dummy(),
        )]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_valid_program() {
        let asm = compile_to_asm(
            "var x = 1\nprint(x + 2)",
            &CompileOptions {
                platform: Platform::Linux,
            },
        )
        .unwrap();
        assert!(asm.contains("main:"));
        assert!(asm.contains("call printf"));
    }

    #[test]
    fn test_lex_error_fails_compilation() {
        assert!(compile_to_asm("var $ = 1", &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_parse_error_fails_compilation() {
        assert!(compile_to_asm("function main( {", &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_type_error_fails_compilation() {
        let err = compile_to_asm("var x = y", &CompileOptions::default()).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].message.contains("unknown identifier 'y'"));
    }

    #[test]
    fn test_transpile_unknown_target() {
        let err = transpile_source("print(1)", "wasm").unwrap_err();
        assert!(err[0].message.contains("unknown target 'wasm'"));
    }

    #[test]
    fn test_transpile_js() {
        let js = transpile_source("print(1)", "js").unwrap();
        assert!(js.contains("console.log(1);"));
    }

    #[test]
    fn test_transpile_checks_types_first() {
        assert!(transpile_source("var x = y", "js").is_err());
    }
}
