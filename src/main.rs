mod cli;

use clap::{Parser, Subcommand};

use cli::build::BuildArgs;
use cli::check::CheckArgs;
use cli::transpile::TranspileArgs;

#[derive(Parser)]
#[command(
    name = "subc",
    version,
    about = "Sub compiler — native x86-64 executables or C/JavaScript/Python source"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .sb file to a native executable
    Build(BuildArgs),
    /// Transpile a .sb file to another language
    Transpile(TranspileArgs),
    /// Lex, parse, and type-check without emitting code
    Check(CheckArgs),
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Build(args) => cli::build::cmd_build(args),
        Command::Transpile(args) => cli::transpile::cmd_transpile(args),
        Command::Check(args) => cli::check::cmd_check(args),
    }
}
