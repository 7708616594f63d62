use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecompileModeCli {
    Pseudo,
    Disasm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuildFamilyCli {
    Mainline,
    Legacy,
    Stormfall,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Log decompiler internals to stderr
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Decompiles a compiled script body
    Decompile {
        #[command(subcommand)]
        command: DecompileCommand,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DecompileCommand {
    /// Decompiles one script-body blob extracted from a package
    Body {
        /// Path to the script-body blob
        path: PathBuf,

        /// Output mode
        #[arg(long, value_enum, default_value_t = DecompileModeCli::Pseudo)]
        mode: DecompileModeCli,

        /// Package file-format version
        #[arg(long, default_value_t = 512)]
        package_version: u16,

        /// Licensee version
        #[arg(long, default_value_t = 0)]
        licensee_version: u16,

        /// Engine lineage of the package
        #[arg(long, value_enum, default_value_t = BuildFamilyCli::Mainline)]
        family: BuildFamilyCli,

        /// JSON symbol map (objects, names, enums) for readable output
        #[arg(long)]
        symbols: Option<PathBuf>,

        /// Suppress jump-offset provenance comments
        #[arg(long, default_value_t = false)]
        no_annotate: bool,

        /// Byte distance separating an explicit continue from the loop end
        #[arg(long, default_value_t = depkg_lib::LOOP_CONTINUE_OFFSET)]
        loop_continue_offset: u32,
    }
}
