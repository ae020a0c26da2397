mod render;

use std::path::PathBuf;

use analyzer::Config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stack-depth-analyzer")]
enum Arguments {
    /// Worst-case stack-depth analysis for ARMv6-M (Cortex-M0/M0+) executables.
    #[command(name = "elf_arm_thumbv6m_cortex_m0")]
    ElfArmThumbv6mCortexM0 {
        #[command(subcommand)]
        command: ArchCommand,
    },

    /// Print the analyzer's version and exit.
    Version,
}

#[derive(Subcommand)]
enum ArchCommand {
    /// Analyze an ELF executable and print a stack-depth summary.
    Summary {
        /// Path to the ELF executable to analyze.
        elf_path: PathBuf,

        /// Optional JSON configuration file (spec §6). Defaults are used if absent.
        config_path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    match Arguments::parse() {
        Arguments::ElfArmThumbv6mCortexM0 { command: ArchCommand::Summary { elf_path, config_path } } => {
            let elf_bytes = std::fs::read(&elf_path).with_context(|| format!("reading `{}`", elf_path.display()))?;

            let config = match config_path {
                Some(path) => {
                    let json = std::fs::read_to_string(&path).with_context(|| format!("reading `{}`", path.display()))?;
                    Config::parse(&json)?
                }
                None => Config::default_config(),
            };

            let report = analyzer::analyze(&elf_bytes, &config)?;
            render::print_summary(&report);
        }

        Arguments::Version => {
            println!("stack-depth-analyzer {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
