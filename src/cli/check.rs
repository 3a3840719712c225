use std::path::PathBuf;

use clap::Args;

use sublang::diagnostic::render_diagnostics;

use super::{read_source, report_and_exit};

#[derive(Args)]
pub struct CheckArgs {
    /// Input .sb source file
    pub input: PathBuf,
}

pub fn cmd_check(args: CheckArgs) {
    let source = read_source(&args.input);
    match sublang::check_source(&source) {
        Ok(warnings) => {
            if !warnings.is_empty() {
                render_diagnostics(&warnings, &args.input.to_string_lossy(), &source);
            }
            eprintln!("{}: no errors", args.input.display());
        }
        Err(diags) => report_and_exit(&diags, &args.input, &source),
    }
}
