use poise::serenity_prelude as serenity;
use poise::CreateReply;
use tracing::info;

use crate::commands::is_admin;
use crate::state::Context;

/// Scan several pages in sequence (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn batch(
    ctx: Context<'_>,
    #[description = "URLs separated by spaces, commas or newlines"] urls: String,
    #[description = "AI model to add a vision audit"]
    #[autocomplete = "crate::commands::autocomplete_model"]
    model: Option<String>,
) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx).await {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    let urls = split_urls(&urls);
    if urls.is_empty() {
        ctx.say("No URLs given.").await?;
        return Ok(());
    }
    ctx.defer().await?;

    let (model, delay) = {
        let config = ctx.data().audit_config.read().await;
        (config.model_for(model), config.batch_delay())
    };
    info!(user = ctx.author().name, urls = urls.len(), model = ?model, "batch scan started");

    let summary = ctx
        .data()
        .orchestrator
        .batch_scan(&urls, model.as_deref(), delay)
        .await;

    let mut content = format!(
        "**Batch scan complete:** {} of {} URLs succeeded, {} violations total",
        summary.metadata.successful, summary.metadata.total_urls, summary.metadata.total_violations
    );
    for failed in summary.failed.iter().take(5) {
        let error: String = failed.error.chars().take(200).collect();
        content.push_str(&format!("\n- failed {}: {}", failed.url, error));
    }
    if summary.failed.len() > 5 {
        content.push_str(&format!("\n- ... and {} more", summary.failed.len() - 5));
    }

    let json = serde_json::to_vec_pretty(&summary)?;
    ctx.send(
        CreateReply::default()
            .content(content)
            .attachment(serenity::CreateAttachment::bytes(json, "batch_summary.json")),
    )
    .await?;

    Ok(())
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
