mod annotate;
mod auditor;
mod axe;
mod browser;
mod commands;
mod llm;
mod scan;
mod state;
#[cfg(test)]
mod testing;
mod violations;

use std::sync::Arc;

use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use annotate::report::ReportGenerator;
use auditor::registry::{AuditorFactory, Credentials, ModelRegistry, Provider};
use axe::AxeCliScanner;
use browser::driver::BrowserDriver;
use scan::ScanOrchestrator;
use state::{AppState, AuditConfig, Settings};
use violations::ViolationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let token = dotenv::var("DISCORD_TOKEN").expect("DISCORD_TOKEN required");
    let guild_id: Option<serenity::GuildId> = dotenv::var("DISCORD_GUILD_ID")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(serenity::GuildId::new);
    let settings = Settings::from_env();

    // Init cache
    let store = Arc::new(ViolationStore::open(&settings.violations_path).await?);
    info!("Violation cache at {:?}", settings.violations_path);

    // Init auditors
    let registry = Arc::new(ModelRegistry::builtin());
    let credentials = Credentials::from_env();
    for provider in Provider::ALL {
        let configured = credentials.get(provider.credential_var()).is_some();
        info!(provider = %provider, configured, "AI provider credentials");
    }
    let factory = Arc::new(AuditorFactory::new(registry.clone(), credentials)?);

    if let Some(model) = &settings.default_model {
        if registry.get(model).is_none() {
            anyhow::bail!(
                "DEFAULT_MODEL '{}' is not a known model. Available models: {}",
                model,
                registry.available_models().join(", ")
            );
        }
    }
    if !settings.admin_ids.is_empty() {
        info!(count = settings.admin_ids.len(), "Admin users configured");
    }

    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::new(AxeCliScanner::new(&settings.axe_command, settings.scan_timeout)),
        Arc::new(BrowserDriver::new(&settings.node_bin, settings.scan_timeout)),
        factory,
        store,
        settings.rule_reference.clone(),
    ));
    let reports = Arc::new(ReportGenerator::new(orchestrator.clone(), &settings.reports_dir));

    let audit_config = Arc::new(RwLock::new(AuditConfig {
        default_model: settings.default_model.clone(),
        ..Default::default()
    }));

    let app_state = AppState {
        orchestrator,
        reports,
        registry,
        admin_ids: settings.admin_ids,
        audit_config,
    };

    let intents = serenity::GatewayIntents::GUILDS;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::audit()],
            on_error: |error| Box::pin(commands::on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                let commands = &framework.options().commands;
                info!("Registering {} top-level command(s):", commands.len());
                for cmd in commands {
                    info!("  /{} ({} subcommands)", cmd.name, cmd.subcommands.len());
                    for sub in &cmd.subcommands {
                        info!("    /{} {}", cmd.name, sub.name);
                    }
                }

                if let Some(gid) = guild_id {
                    info!("Registering to guild {} (instant)", gid);
                    poise::builtins::register_in_guild(ctx, &framework.options().commands, gid)
                        .await?;
                } else {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting accessibility audit bot...");

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    Ok(())
}
