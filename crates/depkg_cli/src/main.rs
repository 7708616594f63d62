use clap::{CommandFactory, Parser};
use log::LevelFilter;

use crate::cli::{BuildFamilyCli, Cli, DecompileCommand, DecompileModeCli, TopLevel};
use crate::symbols::SymbolMap;

mod cli;
mod symbols;

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Debug);
        }
    }

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::Body {
                path,
                mode,
                package_version,
                licensee_version,
                family,
                symbols,
                no_annotate,
                loop_continue_offset,
            } => {
                let mode = match mode {
                    DecompileModeCli::Pseudo => depkg_lib::DecompileMode::Pseudo,
                    DecompileModeCli::Disasm => depkg_lib::DecompileMode::Disasm,
                };
                let family = match family {
                    BuildFamilyCli::Mainline => depkg_lib::BuildFamily::Mainline,
                    BuildFamilyCli::Legacy => depkg_lib::BuildFamily::Legacy,
                    BuildFamilyCli::Stormfall => depkg_lib::BuildFamily::Stormfall,
                };
                let build = depkg_lib::BuildDescriptor {
                    package_version,
                    licensee_version,
                    family,
                };
                let options = depkg_lib::DecompileOptions {
                    mode,
                    annotate_jumps: !no_annotate,
                    loop_continue_offset,
                };
                let resolver: Box<dyn depkg_lib::SymbolResolver> = match symbols {
                    Some(path) => match SymbolMap::load(&path) {
                        Ok(map) => Box::new(map),
                        Err(e) => {
                            eprintln!("{e}");
                            std::process::exit(1);
                        }
                    },
                    None => Box::new(depkg_lib::NoSymbols),
                };
                match std::fs::read(&path) {
                    Ok(bytes) => {
                        match depkg_lib::decompile_body(&bytes, &build, resolver.as_ref(), &options)
                        {
                            Ok(out) => {
                                print!("{}", out.text);
                                for d in &out.diagnostics {
                                    eprintln!("warning: {d}");
                                }
                            }
                            Err(e) => {
                                eprintln!("decompile error: {e}");
                                std::process::exit(1);
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("failed to read {path:?}: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            Cli::command().print_help().unwrap();
        }
    }
}
