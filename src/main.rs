mod cli;
mod commands;
mod config;
mod paths;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::{FileConfig, Settings};
use kubestore::ErrorCategory;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub settings: Settings,
}

fn main() {
    if let Err(e) = run() {
        ui::error(&format!("{e:#}"));
        if let Some(hint) = hint(&e) {
            ui::hint(&hint);
        }
        std::process::exit(1);
    }
}

/// Advice for failures that came from the resource store.
fn hint(err: &anyhow::Error) -> Option<String> {
    let store_error = err.chain().find_map(|cause| {
        cause
            .downcast_ref::<kubestore::Error>()
            .or_else(|| match cause.downcast_ref::<streamops::Error>() {
                Some(streamops::Error::Store(e)) => Some(e),
                _ => None,
            })
    })?;

    match store_error.category() {
        ErrorCategory::Other => None,
        category => Some(format!("{category}. {}", category.advice())),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let config_file = paths::config_file().ok();
    let file = match &config_file {
        Some(path) => FileConfig::load_from(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&cli, file, config_file.filter(|p| p.exists()));

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        settings,
    };

    match cli.command {
        Command::Stream(cmd) => commands::stream::run(&ctx, cmd),
        Command::Downtime(cmd) => commands::downtime::run(&ctx, cmd),
        Command::Config(cmd) => commands::config::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "kubectl-arcane", &mut io::stdout());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_hint_for_store_failures() {
        let err: anyhow::Error = streamops::Error::Store(kubestore::Error::Forbidden(
            "streams: HTTP 403".to_string(),
        ))
        .into();
        let err = err.context("Failed to stop stream");

        let hint = hint(&err).unwrap();
        assert!(hint.starts_with("Access denied."));
        assert!(hint.contains("RBAC"));
    }

    #[test]
    fn test_no_hint_for_other_failures() {
        let err = std::fs::read("/definitely/not/here")
            .context("Failed to read config")
            .unwrap_err();
        assert!(hint(&err).is_none());

        let err: anyhow::Error = streamops::Error::WatchClosed.into();
        assert!(hint(&err).is_none());
    }
}
