use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{
    Badge, CaptureError, ElementId, LivePage, PageCapture, PageElement, PageError, PageSnapshot,
    SelectorError,
};

/// Playwright driver, run by Node and spoken to over JSON lines on stdin/stdout.
const DRIVER_SCRIPT: &str = include_str!("../../driver/page-driver.mjs");

/// Launches one headless browser per capture.
pub struct BrowserDriver {
    node_bin: String,
    timeout: Duration,
}

impl BrowserDriver {
    pub fn new(node_bin: &str, timeout: Duration) -> Self {
        Self {
            node_bin: node_bin.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PageCapture for BrowserDriver {
    async fn capture(&self, url: &str, want_screenshot: bool) -> Result<PageSnapshot, CaptureError> {
        let work = async {
            let mut session = DriverSession::spawn(&self.node_bin, url, self.timeout).await?;
            session.call("open", json!({ "url": url })).await?;
            // Scroll through the page so lazy content is present before extraction.
            session.call("scroll", json!({})).await?;
            let elements: Vec<PageElement> =
                serde_json::from_value(session.call("extract", json!({})).await?)
                    .map_err(|e| CaptureError::Driver(format!("bad element list: {}", e)))?;
            let screenshot = if want_screenshot {
                Some(session.screenshot().await?)
            } else {
                None
            };
            info!(url, elements = elements.len(), screenshot = want_screenshot, "page captured");
            Ok::<_, CaptureError>(PageSnapshot {
                elements,
                screenshot,
                page: Box::new(session),
            })
        };

        // Dropping the in-flight session on timeout kills the browser process.
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| CaptureError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            })?
    }
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// One browser page owned by a driver child process. The process is killed
/// when the session is dropped, whatever the exit path.
pub struct DriverSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    url: String,
    next_id: u64,
    call_timeout: Duration,
}

impl DriverSession {
    pub async fn spawn(node_bin: &str, url: &str, call_timeout: Duration) -> Result<Self, CaptureError> {
        let mut child = Command::new(node_bin)
            .arg("--input-type=module")
            .arg("-e")
            .arg(DRIVER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CaptureError::DriverNotFound {
                    program: node_bin.to_string(),
                },
                _ => CaptureError::Io(e),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::Driver("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Driver("driver stdout unavailable".into()))?;

        debug!(url, pid = ?child.id(), "browser driver spawned");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            url: url.to_string(),
            next_id: 1,
            call_timeout,
        })
    }

    /// Send one command and wait for its reply.
    async fn call(&mut self, cmd: &str, mut args: serde_json::Value) -> Result<serde_json::Value, PageError> {
        let id = self.next_id;
        self.next_id += 1;
        args["id"] = json!(id);
        args["cmd"] = json!(cmd);

        let timeout = self.call_timeout;
        let url = self.url.clone();
        let reply = tokio::time::timeout(timeout, self.roundtrip(id, &args))
            .await
            .map_err(|_| CaptureError::Timeout {
                url,
                secs: timeout.as_secs(),
            })??;

        if reply.ok {
            return Ok(reply.result);
        }
        let message = reply.error.unwrap_or_else(|| "unknown driver error".into());
        match reply.kind.as_deref() {
            Some("selector") => Err(SelectorError {
                selector: args["selector"].as_str().unwrap_or_default().to_string(),
                message,
            }
            .into()),
            _ => Err(CaptureError::Driver(format!("{}: {}", cmd, message)).into()),
        }
    }

    async fn roundtrip(&mut self, id: u64, request: &serde_json::Value) -> Result<DriverReply, CaptureError> {
        let mut line = request.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        while let Some(line) = self.stdout.next_line().await? {
            match serde_json::from_str::<DriverReply>(&line) {
                Ok(reply) if reply.id == id => return Ok(reply),
                Ok(reply) => debug!(expected = id, got = reply.id, "skipping stale driver reply"),
                Err(_) => debug!(line = %line, "driver output"),
            }
        }
        Err(CaptureError::Driver("driver exited before replying".into()))
    }
}

#[async_trait]
impl LivePage for DriverSession {
    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementId>, PageError> {
        let result = self.call("query", json!({ "selector": selector })).await?;
        serde_json::from_value(result)
            .map_err(|e| CaptureError::Driver(format!("bad query result: {}", e)).into())
    }

    async fn flag(&mut self, element: ElementId, badge: &Badge) -> Result<(), CaptureError> {
        self.call(
            "flag",
            json!({ "node": element, "number": badge.number, "impact": badge.impact }),
        )
        .await?;
        Ok(())
    }

    async fn clear_annotations(&mut self) -> Result<usize, CaptureError> {
        let result = self.call("clear", json!({})).await?;
        Ok(result["cleared"].as_u64().unwrap_or(0) as usize)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        let result = self.call("screenshot", json!({})).await?;
        let encoded = result["png"]
            .as_str()
            .ok_or_else(|| CaptureError::Driver("screenshot reply missing png".into()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| CaptureError::Driver(format!("screenshot is not base64: {}", e)))
    }

    async fn close(self: Box<Self>) -> Result<(), CaptureError> {
        let mut session = self;
        if let Err(e) = session.call("close", json!({})).await {
            warn!(url = %session.url, error = %e, "driver close failed, killing process");
            session.child.kill().await?;
            return Ok(());
        }
        match tokio::time::timeout(Duration::from_secs(5), session.child.wait()).await {
            Ok(status) => {
                debug!(url = %session.url, status = ?status?, "browser driver exited");
            }
            Err(_) => session.child.kill().await?,
        }
        Ok(())
    }
}
