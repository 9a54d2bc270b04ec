pub mod driver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One element extracted from a captured page, as given to AI auditors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageElement {
    pub selector: String,
    pub html: String,
    /// `[x, y, width, height]` in CSS pixels.
    pub bbox: [f64; 4],
}

/// Identity of a DOM element for the lifetime of one page session.
pub type ElementId = u64;

/// Numbered marker stamped on a violating element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub number: usize,
    pub impact: String,
}

#[derive(Debug, Clone, Error)]
#[error("selector `{selector}` could not be evaluated: {message}")]
pub struct SelectorError {
    pub selector: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("page capture of {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("browser driver `{program}` not found; install Node.js and Playwright")]
    DriverNotFound { program: String },

    #[error("browser driver failed: {0}")]
    Driver(String),

    #[error("browser driver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaptureError::Timeout { .. } | CaptureError::Driver(_))
    }
}

/// Failure while querying a live page: either the selector itself is bad
/// (recoverable) or the session is broken (not).
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl From<PageError> for CaptureError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Capture(inner) => inner,
            PageError::Selector(inner) => CaptureError::Driver(inner.to_string()),
        }
    }
}

/// A loaded page that can be queried and annotated.
#[async_trait]
pub trait LivePage: Send {
    /// Every element matching `selector`, in document order. Annotation badges never match.
    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementId>, PageError>;

    /// Outline `element` and stamp it with `badge`.
    async fn flag(&mut self, element: ElementId, badge: &Badge) -> Result<(), CaptureError>;

    /// Remove every badge and outline; returns how many markers were removed.
    async fn clear_annotations(&mut self) -> Result<usize, CaptureError>;

    /// Full-page PNG.
    async fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError>;

    async fn close(self: Box<Self>) -> Result<(), CaptureError>;
}

/// What a capture hands back: structural context, optional image, and the live page.
pub struct PageSnapshot {
    pub elements: Vec<PageElement>,
    pub screenshot: Option<Vec<u8>>,
    pub page: Box<dyn LivePage>,
}

#[async_trait]
pub trait PageCapture: Send + Sync {
    async fn capture(&self, url: &str, want_screenshot: bool) -> Result<PageSnapshot, CaptureError>;
}
