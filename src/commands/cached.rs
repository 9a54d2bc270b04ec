use poise::serenity_prelude as serenity;
use poise::CreateReply;
use tracing::debug;

use crate::commands::error_payload;
use crate::state::Context;
use crate::violations::types::CacheLookup;

/// Show the cached violations for a page
#[poise::command(slash_command, guild_only)]
pub async fn cached(
    ctx: Context<'_>,
    #[description = "Page URL"] url: String,
) -> Result<(), anyhow::Error> {
    let lookup = ctx.data().orchestrator.store().lookup(&url).await?;

    match &lookup {
        CacheLookup::Miss { error } => {
            let cached_pages = ctx.data().orchestrator.store().urls().await?.len();
            debug!(url, cached_pages, "cache miss");
            ctx.say(error_payload(error)).await?;
        }
        CacheLookup::Hit {
            url,
            violations,
            timestamp,
            ..
        } => {
            let json = serde_json::to_vec_pretty(&lookup)?;
            let content = format!(
                "**{}** violations cached for {} (scanned {})",
                violations.len(),
                url,
                timestamp.format("%Y-%m-%d %H:%M UTC")
            );
            ctx.send(
                CreateReply::default()
                    .content(content)
                    .attachment(serenity::CreateAttachment::bytes(json, "violations.json")),
            )
            .await?;
        }
    }

    Ok(())
}
