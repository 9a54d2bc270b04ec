use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::auditor::registry::{AuditorResolver, RegistryError};
use crate::auditor::{Auditor, AuditorError};
use crate::axe::{RuleScanError, RuleScanner};
use crate::browser::{CaptureError, PageCapture};
use crate::violations::types::Violation;
use crate::violations::ViolationStore;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Rules(#[from] RuleScanError),

    #[error("AI audit failed: {0}")]
    Auditor(#[from] AuditorError),

    #[error("violation cache error: {0:#}")]
    Store(anyhow::Error),
}

impl ScanError {
    /// Timeouts, flaky drivers and vendor 5xx/429 are worth another attempt;
    /// configuration and parse failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::Registry(_) | ScanError::Store(_) => false,
            ScanError::Capture(e) => e.is_retryable(),
            ScanError::Rules(e) => e.is_retryable(),
            ScanError::Auditor(e) => e.is_retryable(),
        }
    }
}

/// Prefix `https://` when the input has no scheme.
pub fn ensure_scheme(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Runs the rule engine and, when asked, an AI auditor; merges and caches the result.
pub struct ScanOrchestrator {
    rules: Arc<dyn RuleScanner>,
    capture: Arc<dyn PageCapture>,
    auditors: Arc<dyn AuditorResolver>,
    store: Arc<ViolationStore>,
    rule_reference: String,
}

impl ScanOrchestrator {
    pub fn new(
        rules: Arc<dyn RuleScanner>,
        capture: Arc<dyn PageCapture>,
        auditors: Arc<dyn AuditorResolver>,
        store: Arc<ViolationStore>,
        rule_reference: String,
    ) -> Self {
        Self {
            rules,
            capture,
            auditors,
            store,
            rule_reference,
        }
    }

    pub fn store(&self) -> &Arc<ViolationStore> {
        &self.store
    }

    pub fn capture(&self) -> &Arc<dyn PageCapture> {
        &self.capture
    }

    /// Scan `url` and replace its cache record with the AI findings followed by
    /// the rule-engine findings. Any failure aborts before anything is stored.
    pub async fn scan(&self, url: &str, model: Option<&str>) -> Result<Vec<Violation>, ScanError> {
        let url = ensure_scheme(url);
        // Resolve first so a bad model or missing key costs no browser or network time.
        let auditor = model.map(|m| self.auditors.resolve(m)).transpose()?;

        let deterministic = self.rules.scan(&url).await?;

        let mut merged = match &auditor {
            Some(auditor) => self.ai_check(&url, auditor.as_ref()).await?,
            None => Vec::new(),
        };
        let ai_count = merged.len();
        merged.extend(deterministic);

        self.store
            .put(&url, merged.clone())
            .await
            .map_err(ScanError::Store)?;

        info!(
            url = %url,
            ai = ai_count,
            deterministic = merged.len() - ai_count,
            "scan complete"
        );
        Ok(merged)
    }

    async fn ai_check(&self, url: &str, auditor: &dyn Auditor) -> Result<Vec<Violation>, ScanError> {
        let snapshot = self.capture.capture(url, true).await?;
        let page = snapshot.page;
        let result = match snapshot.screenshot {
            Some(png) => auditor
                .run_check(&png, &self.rule_reference, &snapshot.elements, None)
                .await
                .map_err(ScanError::from),
            None => Err(CaptureError::Driver("capture returned no screenshot".into()).into()),
        };
        if let Err(e) = page.close().await {
            warn!(url, error = %e, "failed to close capture session");
        }
        let violations = result?;
        info!(url, model = auditor.model_name(), violations = violations.len(), "AI audit complete");
        Ok(violations)
    }

    /// Scan each URL in turn, pausing `delay` between URLs. Failures are
    /// recorded and never stop the batch.
    pub async fn batch_scan(&self, urls: &[String], model: Option<&str>, delay: Duration) -> BatchSummary {
        let mut results = BTreeMap::new();
        let mut failed = Vec::new();
        let mut total_violations = 0usize;

        for (i, raw) in urls.iter().enumerate() {
            let url = ensure_scheme(raw);
            match self.scan(&url, model).await {
                Ok(violations) => {
                    total_violations += violations.len();
                    results.insert(url, violations.len() as i64);
                }
                Err(e) => {
                    error!(url = %url, error = %e, retryable = e.is_retryable(), "batch scan failed");
                    results.insert(url.clone(), -1);
                    failed.push(FailedScan {
                        url,
                        error: e.to_string(),
                    });
                }
            }

            if (i + 1) % 10 == 0 {
                info!(done = i + 1, total = urls.len(), failed = failed.len(), "batch progress");
            }
            if i + 1 < urls.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let metadata = BatchMetadata {
            timestamp: Utc::now(),
            total_urls: urls.len(),
            successful: urls.len() - failed.len(),
            failed: failed.len(),
            total_violations,
        };
        info!(
            total = metadata.total_urls,
            successful = metadata.successful,
            failed = metadata.failed,
            violations = metadata.total_violations,
            "batch complete"
        );
        BatchSummary {
            metadata,
            results,
            failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedScan {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchMetadata {
    pub timestamp: DateTime<Utc>,
    pub total_urls: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_violations: usize,
}

/// Per-URL violation counts (`-1` for a failed scan) plus the failures themselves.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub metadata: BatchMetadata,
    pub results: BTreeMap<String, i64>,
    pub failed: Vec<FailedScan>,
}
