//! Config command - show the effective configuration

use anyhow::Result;
use serde_json::json;

use crate::Context as AppContext;
use crate::cli::ConfigCommand;
use crate::config::Settings;
use crate::paths;
use crate::ui;

pub fn run(ctx: &AppContext, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&to_json(&ctx.settings))?);
            } else {
                show(&ctx.settings);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", paths::config_file()?.display());
            Ok(())
        }
    }
}

fn show(settings: &Settings) {
    ui::header("Configuration");
    ui::kv(
        "Config file",
        &settings
            .config_file
            .as_ref()
            .map_or_else(|| "(none)".to_string(), |p| p.display().to_string()),
    );
    ui::kv("Server", &settings.server);
    ui::kv("Token", &settings.token.describe());
    ui::kv("Stream namespace", settings.stream_namespace());
    ui::kv(
        "Downtime scope",
        settings.downtime_namespace().unwrap_or("all namespaces"),
    );
    ui::kv(
        "Timeout",
        &settings
            .timeout
            .map_or_else(|| "none".to_string(), |t| format!("{}s", t.as_secs())),
    );
    ui::kv(
        "Poll interval",
        &format!("{}ms", settings.poll_interval.as_millis()),
    );
}

fn to_json(settings: &Settings) -> serde_json::Value {
    json!({
        "config_file": settings.config_file,
        "server": settings.server,
        "token": settings.token.describe(),
        "namespace": settings.namespace,
        "timeout_secs": settings.timeout.map(|t| t.as_secs()),
        "poll_interval_ms": u64::try_from(settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
    })
}
