use poise::serenity_prelude as serenity;
use poise::CreateReply;
use tracing::info;

use crate::state::Context;

/// Build an annotated visual report for a page
#[poise::command(slash_command, guild_only)]
pub async fn report(
    ctx: Context<'_>,
    #[description = "Page URL"] url: String,
    #[description = "AI model, used when the page has to be scanned first"]
    #[autocomplete = "crate::commands::autocomplete_model"]
    model: Option<String>,
    #[description = "Rescan even if violations are cached"] refresh: Option<bool>,
) -> Result<(), anyhow::Error> {
    ctx.defer().await?;

    let (model, max_age) = {
        let config = ctx.data().audit_config.read().await;
        (config.model_for(model), config.max_age())
    };
    info!(user = ctx.author().name, url, model = ?model, "report requested");

    let report = ctx
        .data()
        .reports
        .generate(&url, model.as_deref(), refresh.unwrap_or(false), max_age)
        .await?;

    let file_name = report
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("report.html")
        .to_string();
    let total_pages = report.text_pages.len();
    let text = report
        .text_pages
        .iter()
        .enumerate()
        .map(|(i, page)| format!("----- page {} of {} -----\n{}", i + 1, total_pages, page))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut content = format!(
        "**Report for** {}\n**Violations:** {} | **Highlighted:** {} of {} elements",
        report.summary.url, report.summary.violation_count, report.badges, report.entries
    );
    if !report.failed_annotations.is_empty() {
        content.push_str(&format!(
            "\n{} selector(s) could not be highlighted",
            report.failed_annotations.len()
        ));
    }
    if report.drift.is_some() {
        content.push_str("\nThe page changed while it was annotated; see the note in the report");
    }

    ctx.send(
        CreateReply::default()
            .content(content)
            .attachment(serenity::CreateAttachment::bytes(
                report.html.into_bytes(),
                file_name.clone(),
            ))
            .attachment(serenity::CreateAttachment::bytes(
                text.into_bytes(),
                file_name.replace(".html", ".txt"),
            )),
    )
    .await?;

    Ok(())
}
