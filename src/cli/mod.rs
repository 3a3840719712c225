pub mod build;
pub mod check;
pub mod transpile;

use std::path::Path;
use std::process;

use sublang::diagnostic::{render_diagnostics, Diagnostic};

/// Read a source file or exit with status 1.
pub fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Render diagnostics against the source and exit with status 1.
pub fn report_and_exit(diagnostics: &[Diagnostic], path: &Path, source: &str) -> ! {
    render_diagnostics(diagnostics, &path.to_string_lossy(), source);
    process::exit(1);
}
