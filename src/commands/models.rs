use crate::auditor::registry::Provider;
use crate::state::Context;

/// List the AI models available for audits
#[poise::command(slash_command)]
pub async fn models(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let registry = &ctx.data().registry;
    let default = ctx.data().audit_config.read().await.default_model.clone();

    let mut out = String::from("**Available models** (USD per 1M input / output tokens)\n");
    for provider in Provider::ALL {
        out.push_str(&format!("\n**{}**\n", provider));
        for model in registry.models_by_provider(provider) {
            if let Some(info) = registry.get(&model) {
                let marker = if default.as_deref() == Some(model.as_str()) {
                    " (default)"
                } else {
                    ""
                };
                out.push_str(&format!(
                    "- `{}`: ${:.2} / ${:.2}{}\n",
                    model, info.pricing.input_per_million, info.pricing.output_per_million, marker
                ));
            }
        }
    }

    ctx.say(out).await?;
    Ok(())
}
