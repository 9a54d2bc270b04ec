use chrono::Utc;
use tracing::info;

use crate::annotate::report::ReportSummary;
use crate::commands::{error_payload, send_chunked};
use crate::state::Context;

/// Scan a page with axe-core and, optionally, an AI auditor
#[poise::command(slash_command, guild_only)]
pub async fn scan(
    ctx: Context<'_>,
    #[description = "Page URL"] url: String,
    #[description = "AI model to add a vision audit"]
    #[autocomplete = "crate::commands::autocomplete_model"]
    model: Option<String>,
) -> Result<(), anyhow::Error> {
    ctx.defer().await?;

    let model = ctx.data().audit_config.read().await.model_for(model);
    let provider = model
        .as_deref()
        .and_then(|m| ctx.data().registry.provider_of(m));
    info!(user = ctx.author().name, url, model = ?model, provider = ?provider, "scan requested");

    let violations = match ctx.data().orchestrator.scan(&url, model.as_deref()).await {
        Ok(v) => v,
        Err(e) => {
            let hint = if e.is_retryable() {
                "\nThis looks transient; try again shortly."
            } else {
                ""
            };
            ctx.say(format!("{}{}", error_payload(&e.to_string()), hint))
                .await?;
            return Ok(());
        }
    };

    let summary = ReportSummary::new(&url, Utc::now(), &violations);
    let mut out = format!(
        "**Scanned** {}{}\n**Violations:** {} | **Instances:** {}\n",
        url,
        model
            .as_deref()
            .map(|m| format!(" with `{}`", m))
            .unwrap_or_default(),
        summary.violation_count,
        summary.instance_count
    );
    if !summary.by_impact.is_empty() {
        out.push_str("\n**By impact:**\n");
        for (impact, count) in &summary.by_impact {
            out.push_str(&format!("- {}: {}\n", impact, count));
        }
    }

    let mut rules: Vec<(&String, &usize)> = summary.by_rule.iter().collect();
    rules.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    if !rules.is_empty() {
        out.push_str("\n**Top rules:**\n");
        for (rule, count) in rules.into_iter().take(10) {
            out.push_str(&format!("- `{}` ({} instances)\n", rule, count));
        }
    }

    send_chunked(&ctx, &out).await
}
