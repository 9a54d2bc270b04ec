use crate::commands::is_admin;
use crate::state::Context;

/// Configure audit settings (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "batch_delay_ms | cache_max_age_hours | default_model"] param: Option<String>,
    #[description = "New value (`none` clears default_model)"] value: Option<String>,
) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx).await {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match (param.as_deref(), value) {
        // Show current config
        (None, _) => {
            let config = ctx.data().audit_config.read().await;
            ctx.say(format!(
                "**Audit Configuration:**\n\
                 `batch_delay_ms`: {}\n\
                 `cache_max_age_hours`: {}{}\n\
                 `default_model`: {}",
                config.batch_delay_ms,
                config.cache_max_age_hours,
                if config.cache_max_age_hours == 0 { " (disabled)" } else { "" },
                config.default_model.as_deref().unwrap_or("none")
            ))
            .await?;
        }
        // Set a parameter
        (Some(key), Some(val)) => {
            let reply = apply(&ctx, key, val.trim()).await;
            ctx.say(reply).await?;
        }
        (Some(_), None) => {
            ctx.say("Provide both `param` and `value`. Example: `/audit config batch_delay_ms 2000`")
                .await?;
        }
    }

    Ok(())
}

async fn apply(ctx: &Context<'_>, key: &str, val: &str) -> String {
    match key {
        "batch_delay_ms" | "cache_max_age_hours" => {
            let Ok(n) = val.parse::<u64>() else {
                return format!("`{}` expects a whole number, got `{}`", key, val);
            };
            let mut config = ctx.data().audit_config.write().await;
            if key == "batch_delay_ms" {
                config.batch_delay_ms = n;
            } else if let Err(e) = config.set_cache_max_age_hours(n) {
                return e;
            }
            format!("`{}` set to {}", key, n)
        }
        "default_model" => {
            if val.eq_ignore_ascii_case("none") {
                ctx.data().audit_config.write().await.default_model = None;
                return "`default_model` cleared".to_string();
            }
            let registry = &ctx.data().registry;
            if registry.get(val).is_none() {
                return format!(
                    "Unsupported model '{}'. Available models: {}",
                    val,
                    registry.available_models().join(", ")
                );
            }
            ctx.data().audit_config.write().await.default_model = Some(val.to_string());
            format!("`default_model` set to {}", val)
        }
        _ => format!(
            "Unknown param `{}`. Valid: `batch_delay_ms`, `cache_max_age_hours`, `default_model`",
            key
        ),
    }
}
