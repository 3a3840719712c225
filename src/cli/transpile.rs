use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{read_source, report_and_exit};

#[derive(Args)]
pub struct TranspileArgs {
    /// Input .sb source file
    pub input: PathBuf,
    /// Target language (c, js, python)
    #[arg(long, default_value = "c")]
    pub target: String,
    /// Output file (default: input with the target's extension)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_transpile(args: TranspileArgs) {
    let source = read_source(&args.input);
    let output = match sublang::transpile_source(&source, &args.target) {
        Ok(text) => text,
        Err(diags) => report_and_exit(&diags, &args.input, &source),
    };

    let extension = match args.target.as_str() {
        "js" | "javascript" => "js",
        "py" | "python" => "py",
        _ => "c",
    };
    let out_path = args
        .output
        .unwrap_or_else(|| args.input.with_extension(extension));
    if let Err(e) = std::fs::write(&out_path, output) {
        eprintln!("error: cannot write '{}': {}", out_path.display(), e);
        process::exit(1);
    }
    eprintln!("Transpiled {} -> {}", args.input.display(), out_path.display());
}
