use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::annotate::report::ReportGenerator;
use crate::auditor::prompts::default_rule_reference;
use crate::auditor::registry::ModelRegistry;
use crate::scan::ScanOrchestrator;

/// Start-up settings read from the environment (and `.env`).
pub struct Settings {
    pub violations_path: PathBuf,
    pub reports_dir: PathBuf,
    pub axe_command: String,
    pub node_bin: String,
    pub scan_timeout: Duration,
    pub default_model: Option<String>,
    pub rule_reference: String,
    pub admin_ids: HashSet<u64>,
}

impl Settings {
    pub fn from_env() -> Self {
        let var = |key: &str| dotenv::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            violations_path: var("VIOLATIONS_PATH")
                .unwrap_or_else(|| "violations/violations.json".into())
                .into(),
            reports_dir: var("REPORTS_DIR").unwrap_or_else(|| "reports".into()).into(),
            axe_command: var("AXE_COMMAND").unwrap_or_else(|| "npx @axe-core/cli".into()),
            node_bin: var("NODE_BIN").unwrap_or_else(|| "node".into()),
            scan_timeout: Duration::from_secs(
                var("SCAN_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            default_model: var("DEFAULT_MODEL"),
            rule_reference: var("WCAG_RULE_REFERENCE").unwrap_or_else(default_rule_reference),
            admin_ids: parse_admin_ids(&var("ADMIN_USER_IDS").unwrap_or_default()),
        }
    }
}

fn parse_admin_ids(raw: &str) -> HashSet<u64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect()
}

/// Largest staleness window an admin can configure (about a century).
pub const MAX_CACHE_AGE_HOURS: u64 = 24 * 365 * 100;

/// Audit settings admins can change at runtime.
pub struct AuditConfig {
    pub batch_delay_ms: u64,
    /// 0 disables the staleness check.
    pub cache_max_age_hours: u64,
    pub default_model: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: 1000,
            cache_max_age_hours: 0,
            default_model: None,
        }
    }
}

impl AuditConfig {
    pub fn max_age(&self) -> Option<chrono::Duration> {
        match self.cache_max_age_hours {
            0 => None,
            // A window chrono cannot represent disables the check.
            h => i64::try_from(h).ok().and_then(chrono::Duration::try_hours),
        }
    }

    pub fn set_cache_max_age_hours(&mut self, hours: u64) -> Result<(), String> {
        if hours > MAX_CACHE_AGE_HOURS {
            return Err(format!(
                "`cache_max_age_hours` must be at most {}, got {}",
                MAX_CACHE_AGE_HOURS, hours
            ));
        }
        self.cache_max_age_hours = hours;
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// The model a command should use: its own choice, else the configured default.
    pub fn model_for(&self, requested: Option<String>) -> Option<String> {
        requested
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.default_model.clone())
    }
}

pub struct AppState {
    pub orchestrator: Arc<ScanOrchestrator>,
    pub reports: Arc<ReportGenerator>,
    pub registry: Arc<ModelRegistry>,
    pub admin_ids: HashSet<u64>,
    pub audit_config: Arc<RwLock<AuditConfig>>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_ids_skip_garbage() {
        let ids = parse_admin_ids("123, 456,abc,,789");
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&456));
    }

    #[test]
    fn test_audit_config_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.batch_delay(), Duration::from_secs(1));
        assert!(config.max_age().is_none());
        assert_eq!(config.model_for(None), None);
    }

    #[test]
    fn test_max_age_never_panics_on_huge_values() {
        for hours in [u64::MAX / 2, u64::MAX, i64::MAX as u64 + 1] {
            let config = AuditConfig {
                cache_max_age_hours: hours,
                ..Default::default()
            };
            assert!(config.max_age().is_none(), "hours = {}", hours);
        }
        let config = AuditConfig {
            cache_max_age_hours: 48,
            ..Default::default()
        };
        assert_eq!(config.max_age(), Some(chrono::Duration::hours(48)));
    }

    #[test]
    fn test_set_cache_max_age_rejects_out_of_range() {
        let mut config = AuditConfig::default();
        assert!(config.set_cache_max_age_hours(u64::MAX / 2).is_err());
        assert_eq!(config.cache_max_age_hours, 0);
        config.set_cache_max_age_hours(MAX_CACHE_AGE_HOURS).unwrap();
        assert_eq!(config.max_age(), Some(chrono::Duration::hours(MAX_CACHE_AGE_HOURS as i64)));
    }

    #[test]
    fn test_model_for_prefers_request_over_default() {
        let config = AuditConfig {
            default_model: Some("gpt-4o-mini".into()),
            ..Default::default()
        };
        assert_eq!(config.model_for(Some("deepseek-chat".into())).as_deref(), Some("deepseek-chat"));
        assert_eq!(config.model_for(Some(" ".into())).as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.model_for(None).as_deref(), Some("gpt-4o-mini"));
    }
}
