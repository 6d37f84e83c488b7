//! Downtime command - suspend or resume many streams under a key

use anyhow::{Context, Result};

use streamops::{
    BulkEngine, BulkOptions, BulkSummary, ConsoleReporter, DeclareDowntime, Mutation, StopDowntime,
};

use crate::Context as AppContext;
use crate::cli::DowntimeCommand;
use crate::ui;

pub fn run(ctx: &AppContext, cmd: DowntimeCommand) -> Result<()> {
    match cmd {
        DowntimeCommand::Declare {
            stream_class,
            prefix,
            key,
        } => apply(ctx, &stream_class, &DeclareDowntime::new(prefix, key)),
        DowntimeCommand::Stop { stream_class, key } => {
            apply(ctx, &stream_class, &StopDowntime::new(key))
        }
    }
}

fn apply(ctx: &AppContext, stream_class: &str, mutation: &dyn Mutation) -> Result<()> {
    let provider = ctx.settings.store_provider();
    let options = BulkOptions {
        namespace: ctx.settings.downtime_namespace().map(str::to_string),
        ..Default::default()
    };

    let summary = BulkEngine::new(&provider, &ConsoleReporter)
        .with_options(options)
        .run(stream_class, mutation, &ctx.settings.cancel_token())
        .with_context(|| format!("Failed {}", mutation.description()))?;

    if !ctx.quiet {
        report(ctx, &summary);
    }
    if summary.dropped > 0 {
        anyhow::bail!(
            "{} could not be updated",
            ui::plural(summary.dropped, "stream")
        );
    }
    Ok(())
}

fn report(ctx: &AppContext, summary: &BulkSummary) {
    if summary.matched == 0 {
        ui::info("No matching streams");
        return;
    }
    ui::dim(&format!(
        "{} updated, {} already in place",
        ui::plural(summary.persisted, "stream"),
        summary.unchanged
    ));
    if ctx.verbose > 0 {
        ui::dim(&format!(
            "{} listed, {} matched, {} unreadable",
            summary.listed, summary.matched, summary.invalid
        ));
    }
    if summary.invalid > 0 {
        ui::warn(&format!(
            "{} could not be read and were skipped",
            ui::plural(summary.invalid, "object")
        ));
    }
}
