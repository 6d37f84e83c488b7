//! Stream command - start, stop or backfill one stream

use anyhow::{Context, Result};
use colored::Colorize;

use kubestore::NamespacedName;
use streamops::{
    BackfillOptions, BackfillRequest, BackfillWatcher, StartStream, StopStream, Transition,
    TransitionController,
};

use crate::Context as AppContext;
use crate::cli::StreamCommand;
use crate::progress;
use crate::ui;

pub fn run(ctx: &AppContext, cmd: StreamCommand) -> Result<()> {
    match cmd {
        StreamCommand::Start {
            stream_class,
            stream_id,
        } => transition(ctx, &stream_class, &stream_id, &StartStream, "started"),
        StreamCommand::Stop {
            stream_class,
            stream_id,
        } => transition(ctx, &stream_class, &stream_id, &StopStream, "suspended"),
        StreamCommand::Backfill {
            stream_class,
            stream_id,
            wait,
            dry_run,
        } => backfill(
            ctx,
            &stream_class,
            &stream_id,
            BackfillOptions { wait, dry_run },
        ),
    }
}

fn transition(
    ctx: &AppContext,
    stream_class: &str,
    stream_id: &str,
    transition: &dyn Transition,
    verb: &str,
) -> Result<()> {
    let provider = ctx.settings.store_provider();
    let id = NamespacedName::new(ctx.settings.stream_namespace(), stream_id);

    let outcome = TransitionController::new(&provider)
        .with_poll(ctx.settings.poll())
        .run(stream_class, &id, transition, &ctx.settings.cancel_token());

    match outcome {
        Ok(stream) => {
            if !ctx.quiet {
                ui::success(&format!("{} {}", stream.id().to_string().bold(), verb));
            }
            Ok(())
        }
        Err(e) if e.is_no_op() => {
            if !ctx.quiet {
                ui::info(&e.to_string());
            }
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to update stream {id}")),
    }
}

fn backfill(
    ctx: &AppContext,
    stream_class: &str,
    stream_id: &str,
    options: BackfillOptions,
) -> Result<()> {
    let provider = ctx.settings.store_provider();
    let request = BackfillRequest::new(ctx.settings.stream_namespace(), stream_class, stream_id);

    let pb = options.wait.then(|| {
        progress::spinner(
            &format!("Waiting for backfill of {stream_id} to complete"),
            ctx.quiet,
        )
    });
    let outcome =
        BackfillWatcher::new(&provider).run(&request, options, &ctx.settings.cancel_token());
    if let Some(pb) = &pb {
        progress::finish_clear(pb);
    }

    let done = outcome
        .with_context(|| format!("Backfill of {}/{stream_id} failed", request.namespace))?;

    if !ctx.quiet {
        let name = format!("{}/{}", done.namespace, done.name).bold();
        if options.dry_run {
            ui::info(&format!("Backfill request {name} validated (dry run)"));
        } else if done.completed {
            ui::success(&format!("Backfill request {name} completed"));
        } else {
            ui::success(&format!("Backfill request {name} created"));
        }
    }
    Ok(())
}
