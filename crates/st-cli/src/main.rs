//! `st`: render a StringTemplate group/template against attributes
//! supplied on the command line, or dump a compiled template's bytecode.

mod attrs;
mod loader;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use st_lib::RenderOptions;

#[derive(Parser)]
#[command(name = "st", version, about = "Render or inspect StringTemplate groups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template against attributes and print the result.
    Render(RenderArgs),
    /// Disassemble a compiled template's bytecode.
    Dump(DumpArgs),
}

#[derive(clap::Args)]
struct RenderArgs {
    /// Path to a `.stg` group file or a group directory.
    #[arg(long, value_name = "PATH")]
    group: std::path::PathBuf,

    /// Absolute template name, e.g. `/greeting`.
    #[arg(long)]
    template: String,

    /// An attribute binding: `name=value`, or `name=@file.json` to load a
    /// JSON value (object -> aggregate, array -> multi-valued list,
    /// scalar -> the scalar itself). Repeatable.
    #[arg(long = "attr", value_name = "NAME=VALUE")]
    attrs: Vec<String>,

    /// Wrap output at this column; omit for no wrapping.
    #[arg(long)]
    line_width: Option<usize>,
}

#[derive(clap::Args)]
struct DumpArgs {
    #[arg(long, value_name = "PATH")]
    group: std::path::PathBuf,

    #[arg(long)]
    template: String,

    /// Colorize the disassembly for a terminal.
    #[arg(long)]
    color: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => run_render(args),
        Command::Dump(args) => run_dump(args),
    }
}

fn run_render(args: RenderArgs) -> ExitCode {
    let group = match loader::load_group(&args.group) {
        Ok(g) => g,
        Err(e) => return fail(&e),
    };
    let Some(st) = group.get_instance_of(&args.template) else {
        return fail(&format!("no such template: {}", args.template));
    };
    for raw in &args.attrs {
        if let Err(e) = attrs::apply_attr(&st, raw) {
            return fail(&e);
        }
    }
    let options = RenderOptions { locale: None, line_width: args.line_width };
    print!("{}", st.render_with(options));
    ExitCode::SUCCESS
}

fn run_dump(args: DumpArgs) -> ExitCode {
    let group = match loader::load_group(&args.group) {
        Ok(g) => g,
        Err(e) => return fail(&e),
    };
    let Some((compiled, _native)) = group.resolve(&args.template) else {
        return fail(&format!("no such template: {}", args.template));
    };
    let listing = st_bytecode::disassemble(&compiled.code, &compiled.strings, st_core::Colors::new(args.color));
    print!("{listing}");
    ExitCode::SUCCESS
}

fn fail(message: &str) -> ExitCode {
    log::error!("{message}");
    eprintln!("error: {message}");
    ExitCode::FAILURE
}
