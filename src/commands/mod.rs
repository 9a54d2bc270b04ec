mod batch;
mod cached;
mod config;
mod models;
mod report;
mod scan;

use tracing::error;

use crate::state::{AppState, Context};

/// WCAG accessibility audits
#[poise::command(
    slash_command,
    subcommands(
        "scan::scan",
        "cached::cached",
        "report::report",
        "models::models",
        "batch::batch",
        "config::config"
    )
)]
pub async fn audit(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

pub async fn is_admin(ctx: &Context<'_>) -> bool {
    ctx.data().is_admin(ctx.author().id.get())
}

/// `{"error": ...}` as a Discord code block.
pub fn error_payload(message: &str) -> String {
    let payload = serde_json::json!({ "error": message });
    format!(
        "```json\n{}\n```",
        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
    )
}

/// Failed commands answer with an error payload instead of the default text.
pub async fn on_error(err: poise::FrameworkError<'_, AppState, anyhow::Error>) {
    match err {
        poise::FrameworkError::Command { error, ctx, .. } => {
            let message = format!("{:#}", error);
            error!(command = %ctx.command().qualified_name, error = %message, "command failed");
            if let Err(e) = ctx.say(error_payload(&message)).await {
                error!("Failed to report command error: {}", e);
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

/// Send a message in Discord-safe chunks (max 1990 chars).
pub async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut chunk_len = remaining.len().min(1990);
        while !remaining.is_char_boundary(chunk_len) {
            chunk_len -= 1;
        }
        let split_at = if chunk_len < remaining.len() {
            remaining[..chunk_len]
                .rfind('\n')
                .or_else(|| remaining[..chunk_len].rfind(' '))
                .map(|i| i + 1)
                .unwrap_or(chunk_len)
        } else {
            chunk_len
        };
        let chunk = &remaining[..split_at];
        remaining = &remaining[split_at..];

        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Autocomplete for registered model names.
pub async fn autocomplete_model(ctx: Context<'_>, partial: &str) -> Vec<String> {
    let partial = partial.to_lowercase();
    ctx.data()
        .registry
        .iter()
        .map(|info| info.model.clone())
        .filter(|m| m.contains(&partial))
        .take(25)
        .collect()
}
