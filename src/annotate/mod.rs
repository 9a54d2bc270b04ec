//! Numbering of (violation, node, matched element) triples on a live page.
//!
//! The render pass stamps badges and the describe pass lists entries. Both walk
//! violations, then nodes, then target selectors, then every DOM match in
//! document order, and both skip an element already numbered earlier in the
//! walk. Badge `k` on the screenshot is therefore entry `k` in the report.

pub mod report;

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::browser::{Badge, CaptureError, ElementId, LivePage, PageError};
use crate::violations::types::{NodeResult, Violation};

/// One line of the written report, tied to badge `number` on the screenshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberedViolationEntry {
    pub number: usize,
    pub rule_id: String,
    pub description: String,
    pub impact: String,
    pub target: String,
    /// 1-based position among the selector's matches.
    pub element_index: usize,
    pub total_elements: usize,
    pub html: String,
    pub failure_summary: Option<String>,
}

/// A selector the page could not evaluate, or an element that could not be stamped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedAnnotation {
    pub selector: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    /// One entry per number issued, in badge order. Longer than `badges` only
    /// when an element could not be stamped.
    pub entries: Vec<NumberedViolationEntry>,
    pub badges: usize,
    pub failed_annotations: Vec<FailedAnnotation>,
}

/// Render and describe walks that disagreed because the page changed under them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageDrift {
    pub rendered: usize,
    pub described: usize,
    /// First number whose entry differs between the two walks.
    pub first_mismatch: usize,
}

/// Everything a report needs from one annotated page session.
#[derive(Debug, Clone)]
pub struct Correlation {
    pub entries: Vec<NumberedViolationEntry>,
    pub badges: usize,
    pub failed_annotations: Vec<FailedAnnotation>,
    pub drift: Option<PageDrift>,
    pub screenshot: Vec<u8>,
}

struct NumberedMatch<'a> {
    number: usize,
    element: ElementId,
    violation: &'a Violation,
    node: &'a NodeResult,
    selector: &'a str,
    element_index: usize,
    total_elements: usize,
}

async fn number_matches<'a>(
    page: &mut dyn LivePage,
    violations: &'a [Violation],
) -> Result<(Vec<NumberedMatch<'a>>, Vec<FailedAnnotation>), CaptureError> {
    let mut seen: HashSet<ElementId> = HashSet::new();
    let mut numbered = Vec::new();
    let mut failed = Vec::new();

    for violation in violations {
        for node in &violation.nodes {
            for selector in &node.target {
                let elements = match page.query_all(selector).await {
                    Ok(elements) => elements,
                    Err(PageError::Selector(e)) => {
                        failed.push(FailedAnnotation {
                            selector: selector.clone(),
                            error: e.message,
                        });
                        continue;
                    }
                    Err(PageError::Capture(e)) => return Err(e),
                };
                if elements.is_empty() {
                    debug!(rule = %violation.id, selector = %selector, "selector matched nothing");
                }
                let total_elements = elements.len();
                for (i, element) in elements.into_iter().enumerate() {
                    if !seen.insert(element) {
                        continue;
                    }
                    numbered.push(NumberedMatch {
                        number: numbered.len() + 1,
                        element,
                        violation,
                        node,
                        selector,
                        element_index: i + 1,
                        total_elements,
                    });
                }
            }
        }
    }
    Ok((numbered, failed))
}

impl NumberedMatch<'_> {
    fn entry(&self) -> NumberedViolationEntry {
        NumberedViolationEntry {
            number: self.number,
            rule_id: self.violation.id.clone(),
            description: self.violation.description.clone(),
            impact: self.violation.impact_or_unknown().to_string(),
            target: self.selector.to_string(),
            element_index: self.element_index,
            total_elements: self.total_elements,
            html: self.node.html.clone(),
            failure_summary: self.node.failure_summary.clone(),
        }
    }
}

/// Outline every matched element and stamp it with its number.
pub async fn render_pass(
    page: &mut dyn LivePage,
    violations: &[Violation],
) -> Result<RenderOutcome, CaptureError> {
    let (numbered, mut failed_annotations) = number_matches(page, violations).await?;

    let mut badges = 0;
    for m in &numbered {
        let badge = Badge {
            number: m.number,
            impact: m.violation.impact_or_unknown().to_string(),
        };
        match page.flag(m.element, &badge).await {
            Ok(()) => badges += 1,
            // The element went away between query and stamp; the number stays taken.
            Err(CaptureError::Driver(message)) => failed_annotations.push(FailedAnnotation {
                selector: m.selector.to_string(),
                error: message,
            }),
            Err(e) => return Err(e),
        }
    }

    for failure in &failed_annotations {
        warn!(selector = %failure.selector, error = %failure.error, "annotation failed");
    }
    info!(
        badges,
        total = numbered.len(),
        failed = failed_annotations.len(),
        "violations highlighted"
    );
    Ok(RenderOutcome {
        entries: numbered.iter().map(NumberedMatch::entry).collect(),
        badges,
        failed_annotations,
    })
}

/// Numbered report entries, in the same order and numbering as the render pass.
pub async fn describe_pass(
    page: &mut dyn LivePage,
    violations: &[Violation],
) -> Result<Vec<NumberedViolationEntry>, CaptureError> {
    let (numbered, _) = number_matches(page, violations).await?;
    Ok(numbered.iter().map(NumberedMatch::entry).collect())
}

fn compare_walks(
    rendered: &[NumberedViolationEntry],
    described: &[NumberedViolationEntry],
) -> Option<PageDrift> {
    let first_mismatch = rendered
        .iter()
        .zip(described)
        .position(|(r, d)| r != d)
        .or_else(|| (rendered.len() != described.len()).then_some(rendered.len().min(described.len())))?;
    Some(PageDrift {
        rendered: rendered.len(),
        described: described.len(),
        first_mismatch: first_mismatch + 1,
    })
}

/// Clear old markers, run both passes on `page`, then take the annotated screenshot.
///
/// Report entries are the ones the render pass numbered, so entry `k` is badge
/// `k` even if the page mutates itself. The describe pass re-walks the page and
/// any disagreement is returned as [`PageDrift`] for the report to show.
pub async fn correlate(
    page: &mut dyn LivePage,
    violations: &[Violation],
) -> Result<Correlation, CaptureError> {
    let cleared = page.clear_annotations().await?;
    if cleared > 0 {
        debug!(cleared, "removed existing annotations");
    }

    let render = render_pass(page, violations).await?;
    let described = describe_pass(page, violations).await?;
    let drift = compare_walks(&render.entries, &described);
    if let Some(drift) = &drift {
        warn!(
            rendered = drift.rendered,
            described = drift.described,
            first_mismatch = drift.first_mismatch,
            "page changed between render and describe passes"
        );
    }
    let screenshot = page.screenshot().await?;

    Ok(Correlation {
        entries: render.entries,
        badges: render.badges,
        failed_annotations: render.failed_annotations,
        drift,
        screenshot,
    })
}
