// Copyright © The AutoTrigger Contributors
// SPDX-License-Identifier: MIT

/*!
 Command line frontend for the trigger compiler.

 Without flags it loads the configured repository and writes every project
 library's generated Galaxy source (and its header sibling) into the output
 directory; `-i` starts the interactive trigger console instead.
*/

use std::path::PathBuf;

use clap::Parser;

use autotrigger_compiler::{generator, load_repository, CompileError, CompilerConfiguration, Result};

mod interactive;

#[derive(Parser)]
#[command(name = "autotrigger", about = "Compile SC2 trigger libraries to Galaxy without the editor")]
struct Cli {
    /// Start the interactive trigger console
    #[arg(short, long)]
    interactive: bool,

    /// Path to the configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Output directory for generated Galaxy sources
    #[arg(long, default_value = "out")]
    out: PathBuf,
}

fn run(cli: &Cli) -> Result<()> {
    let config = CompilerConfiguration::from_file(&cli.config)?;
    let mut repo = load_repository(&config)?;
    if cli.interactive {
        return interactive::run(&mut repo, &config);
    }
    std::fs::create_dir_all(&cli.out).map_err(|e| CompileError::file(&cli.out, e))?;
    for mod_name in &config.mods {
        let lib = repo.lib_by_name(mod_name)?;
        let galaxy_path = cli.out.join(format!("Lib{}.galaxy", lib.library));
        let mut galaxy_file =
            std::fs::File::create(&galaxy_path).map_err(|e| CompileError::file(&galaxy_path, e))?;
        generator::generate(&repo, lib, &mut galaxy_file)?;
        let header_path = cli.out.join(format!("Lib{}_h.galaxy", lib.library));
        let mut header_file =
            std::fs::File::create(&header_path).map_err(|e| CompileError::file(&header_path, e))?;
        generator::generate_header(&repo, lib, &mut header_file)?;
        tracing::info!(library = mod_name, path = %galaxy_path.display(), "wrote galaxy source");
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    if let Err(error) = run(&cli) {
        tracing::error!("{error}");
        std::process::exit(1);
    }
}
