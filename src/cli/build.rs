use std::path::PathBuf;
use std::process::{self, Command};

use clap::Args;

use sublang::codegen::Platform;
use sublang::CompileOptions;

use super::{read_source, report_and_exit};

#[derive(Args)]
pub struct BuildArgs {
    /// Input .sb source file
    pub input: PathBuf,
    /// Output executable path (default: program)
    pub output: Option<PathBuf>,
    /// Keep the intermediate assembly file
    #[arg(long)]
    pub keep_asm: bool,
    /// Target platform for symbol naming (linux, macos, windows; default: host)
    #[arg(long)]
    pub platform: Option<String>,
}

pub fn cmd_build(args: BuildArgs) {
    let BuildArgs {
        input,
        output,
        keep_asm,
        platform,
    } = args;

    let platform = match platform.as_deref() {
        None => Platform::host(),
        Some(name) => match Platform::from_name(name) {
            Some(p) => p,
            None => {
                eprintln!("error: unknown platform '{}'", name);
                process::exit(1);
            }
        },
    };

    let source = read_source(&input);
    let options = CompileOptions { platform };
    let asm = match sublang::compile_to_asm(&source, &options) {
        Ok(asm) => asm,
        Err(diags) => report_and_exit(&diags, &input, &source),
    };

    let output = output.unwrap_or_else(|| PathBuf::from("program"));
    let asm_path = PathBuf::from(format!("{}.s", output.display()));
    if let Err(e) = std::fs::write(&asm_path, &asm) {
        eprintln!("error: cannot write '{}': {}", asm_path.display(), e);
        process::exit(1);
    }
    eprintln!("Assembly -> {}", asm_path.display());

    if let Err(message) = assemble(platform, &asm_path, &output) {
        eprintln!("error: {}", message);
        process::exit(1);
    }

    if !keep_asm {
        let _ = std::fs::remove_file(&asm_path);
    }
    eprintln!("Compiled {} -> {}", input.display(), output.display());
}

/// Shell out to the platform toolchain: `gcc` on Unix-likes, `ml64`/`link`
/// on Windows.
fn assemble(platform: Platform, asm_path: &PathBuf, output: &PathBuf) -> Result<(), String> {
    match platform {
        Platform::Windows => {
            let obj = output.with_extension("obj");
            run_tool(
                Command::new("ml64")
                    .arg("/nologo")
                    .arg("/c")
                    .arg(format!("/Fo{}", obj.display()))
                    .arg(asm_path),
                "ml64",
            )?;
            run_tool(
                Command::new("link")
                    .arg("/nologo")
                    .arg(format!("/OUT:{}", output.display()))
                    .arg(&obj),
                "link",
            )
        }
        _ => run_tool(
            Command::new("gcc").arg("-o").arg(output).arg(asm_path),
            "gcc",
        ),
    }
}

fn run_tool(command: &mut Command, name: &str) -> Result<(), String> {
    let status = command
        .status()
        .map_err(|e| format!("cannot run {}: {}", name, e))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{} exited with status {}", name, status))
    }
}
