//! Fakes for the browser, rule engine and auditors, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::auditor::registry::{AuditorResolver, Provider, RegistryError};
use crate::auditor::{Auditor, AuditorError};
use crate::axe::{RuleScanError, RuleScanner};
use crate::browser::{
    Badge, CaptureError, ElementId, LivePage, PageCapture, PageElement, PageError, PageSnapshot,
    SelectorError,
};
use crate::violations::types::{NodeResult, Violation};

/// A violation with one node per target list.
pub fn violation(id: &str, impact: &str, nodes: &[&[&str]]) -> Violation {
    Violation {
        id: id.to_string(),
        description: format!("{} description", id),
        impact: Some(impact.to_string()),
        nodes: nodes
            .iter()
            .map(|targets| {
                NodeResult::new(
                    &format!("<{}>", targets.first().copied().unwrap_or("div")),
                    targets.iter().map(|t| t.to_string()).collect(),
                    None,
                )
            })
            .collect(),
    }
}

pub fn element(selector: &str, html: &str) -> PageElement {
    PageElement {
        selector: selector.to_string(),
        html: html.to_string(),
        bbox: [0.0, 0.0, 100.0, 20.0],
    }
}

/// What a [`FakePage`] was asked to do.
#[derive(Debug, Default)]
pub struct PageLog {
    pub queries: Vec<String>,
    pub flags: Vec<(ElementId, Badge)>,
    pub cleared: usize,
    pub screenshots: usize,
    pub closed: bool,
}

/// In-memory page: selectors resolve to fixed element ids.
#[derive(Clone, Default)]
pub struct FakePage {
    matches: HashMap<String, Vec<ElementId>>,
    matches_after_flag: HashMap<String, Vec<ElementId>>,
    detached: HashSet<ElementId>,
    invalid: HashSet<String>,
    broken: bool,
    log: Arc<Mutex<PageLog>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matches(mut self, selector: &str, ids: &[ElementId]) -> Self {
        self.matches.insert(selector.to_string(), ids.to_vec());
        self
    }

    /// Once any badge is on the page, `selector` resolves to `ids` instead.
    pub fn with_matches_after_flag(mut self, selector: &str, ids: &[ElementId]) -> Self {
        self.matches_after_flag.insert(selector.to_string(), ids.to_vec());
        self
    }

    /// `element` is returned by queries but detaches before it can be stamped.
    pub fn with_detached(mut self, element: ElementId) -> Self {
        self.detached.insert(element);
        self
    }

    pub fn with_invalid(mut self, selector: &str) -> Self {
        self.invalid.insert(selector.to_string());
        self
    }

    /// Every query fails as if the browser died.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<PageLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl LivePage for FakePage {
    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementId>, PageError> {
        let mut log = self.log.lock().unwrap();
        log.queries.push(selector.to_string());
        if self.broken {
            return Err(CaptureError::Driver("target closed".into()).into());
        }
        if self.invalid.contains(selector) {
            return Err(SelectorError {
                selector: selector.to_string(),
                message: "is not a valid selector".into(),
            }
            .into());
        }
        let matches = if log.flags.is_empty() {
            None
        } else {
            self.matches_after_flag.get(selector)
        };
        Ok(matches
            .or_else(|| self.matches.get(selector))
            .cloned()
            .unwrap_or_default())
    }

    async fn flag(&mut self, element: ElementId, badge: &Badge) -> Result<(), CaptureError> {
        if self.detached.contains(&element) {
            return Err(CaptureError::Driver(format!(
                "flag: element {} is no longer attached",
                element
            )));
        }
        self.log.lock().unwrap().flags.push((element, badge.clone()));
        Ok(())
    }

    async fn clear_annotations(&mut self) -> Result<usize, CaptureError> {
        let mut log = self.log.lock().unwrap();
        let n = log.flags.len();
        log.flags.clear();
        log.cleared += n;
        Ok(n)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        self.log.lock().unwrap().screenshots += 1;
        Ok(b"annotated-png".to_vec())
    }

    async fn close(self: Box<Self>) -> Result<(), CaptureError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out clones of one [`FakePage`], so its log survives the capture.
pub struct FakeCapture {
    page: FakePage,
    elements: Vec<PageElement>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeCapture {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            elements: vec![element("img.hero", "<img class=\"hero\">")],
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every capture times out.
    pub fn failing() -> Self {
        let mut capture = Self::new(FakePage::new());
        capture.fail = true;
        capture
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageCapture for FakeCapture {
    async fn capture(&self, url: &str, want_screenshot: bool) -> Result<PageSnapshot, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CaptureError::Timeout {
                url: url.to_string(),
                secs: 120,
            });
        }
        Ok(PageSnapshot {
            elements: self.elements.clone(),
            screenshot: want_screenshot.then(|| b"png".to_vec()),
            page: Box::new(self.page.clone()),
        })
    }
}

pub struct FakeRuleScanner {
    violations: Vec<Violation>,
    failing_urls: HashSet<String>,
    fail_all: bool,
    calls: AtomicUsize,
}

impl FakeRuleScanner {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self {
            violations,
            failing_urls: HashSet::new(),
            fail_all: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        let mut scanner = Self::new(vec![]);
        scanner.fail_all = true;
        scanner
    }

    pub fn failing_for(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleScanner for FakeRuleScanner {
    async fn scan(&self, url: &str) -> Result<Vec<Violation>, RuleScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.failing_urls.contains(url) {
            return Err(RuleScanError::Timeout {
                url: url.to_string(),
                secs: 120,
            });
        }
        Ok(self.violations.clone())
    }
}

pub struct MockAuditor {
    model: String,
    violations: Vec<Violation>,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockAuditor {
    pub fn new(model: &str, violations: Vec<Violation>) -> Self {
        Self {
            model: model.to_string(),
            violations,
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(model: &str) -> Self {
        let mut auditor = Self::new(model, vec![]);
        auditor.should_fail = true;
        auditor
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Auditor for MockAuditor {
    async fn run_check(
        &self,
        _screenshot: &[u8],
        _rule_reference: &str,
        _elements: &[PageElement],
        _system_instruction: Option<&str>,
    ) -> Result<Vec<Violation>, AuditorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(AuditorError::Api {
                provider: Provider::OpenAi,
                status: 401,
                body: "invalid api key".into(),
            });
        }
        Ok(self.violations.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Resolves exactly one model name to a shared [`MockAuditor`].
pub struct FakeResolver {
    auditor: Arc<MockAuditor>,
}

impl FakeResolver {
    pub fn new(auditor: Arc<MockAuditor>) -> Self {
        Self { auditor }
    }
}

impl AuditorResolver for FakeResolver {
    fn resolve(&self, model: &str) -> Result<Arc<dyn Auditor>, RegistryError> {
        if model == self.auditor.model_name() {
            let auditor: Arc<dyn Auditor> = self.auditor.clone();
            Ok(auditor)
        } else {
            Err(RegistryError::UnsupportedModel {
                model: model.to_string(),
                available: vec![self.auditor.model_name().to_string()],
            })
        }
    }
}
