mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show dexpatch info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("dexpatch", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Info { path } => commands::info::run(path, &cli.global),
        Command::Methods { path, class } => {
            commands::methods::run(path, class.as_deref(), &cli.global)
        }
        Command::Resolve { path, plan } => commands::resolve::run(path, plan, &cli.global),
        Command::Apply { path, plan, output } => {
            commands::apply::run(path, plan, output, &cli.global)
        }
        Command::Block {
            path,
            class,
            methods,
            returns,
            accessor,
            key,
            output,
        } => commands::block::run(
            path,
            &commands::block::BlockOptions {
                class,
                methods,
                returns,
                accessor: accessor.as_deref(),
                key,
                output,
                global: &cli.global,
            },
        ),
    }
}
