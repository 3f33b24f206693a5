//! CDP transport: a thin client over `tokio-tungstenite`.
//!
//! Only the commands the render session needs are implemented. Every
//! message in either direction is reported through the session's
//! [`DebugCallback`] as `"-> %s"` / `"<- %s"`, which is how events reach
//! the dispatcher.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::chrome::{LaunchOptions, find_chrome};
use crate::error::BrowserError;
use crate::transport::{BrowserLauncher, DebugCallback, PageTarget};
use crate::types::{DeviceMetrics, ExecutionContext, ScreencastOptions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending CDP command waiting for response.
type PendingTx = oneshot::Sender<Result<Value, String>>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const STARTUP_POLL: Duration = Duration::from_millis(100);
const STARTUP_POLLS: u32 = 100;

/// Internal CDP command message.
struct CdpCommand {
    method: String,
    params: Value,
    response_tx: PendingTx,
}

/// Launches a local Chrome and drives its first page over CDP.
#[derive(Clone, Copy, Debug, Default)]
pub struct CdpLauncher;

#[async_trait]
impl BrowserLauncher for CdpLauncher {
    async fn launch(
        &self,
        options: &LaunchOptions,
        on_debug: DebugCallback,
    ) -> Result<Arc<dyn PageTarget>, BrowserError> {
        let page = CdpPage::launch(options, on_debug).await?;
        Ok(Arc::new(page))
    }
}

/// One Chrome process and the CDP connection to its page.
pub struct CdpPage {
    cmd_tx: mpsc::Sender<CdpCommand>,
    handler: Mutex<Option<JoinHandle<Result<(), BrowserError>>>>,
    chrome_process: Mutex<Option<Child>>,
    _profile: TempDir,
}

impl CdpPage {
    /// Launch Chrome with `options` and connect to its page.
    ///
    /// The `Page` and `Runtime` domains are enabled before returning so
    /// load, screencast and console events flow.
    pub async fn launch(
        options: &LaunchOptions,
        on_debug: DebugCallback,
    ) -> Result<Self, BrowserError> {
        let chrome_path =
            find_chrome(options.chrome_path.as_deref()).ok_or(BrowserError::ChromeNotFound)?;

        // Find a free port
        let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| {
            BrowserError::LaunchFailed {
                context: format!("bind port: {e}"),
            }
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| BrowserError::LaunchFailed {
                context: format!("local_addr: {e}"),
            })?
            .port();
        drop(listener);

        let profile = tempfile::Builder::new()
            .prefix("render-profile-")
            .tempdir()
            .map_err(|e| BrowserError::LaunchFailed {
                context: format!("profile dir: {e}"),
            })?;

        info!(path = %chrome_path.display(), port, headless = options.headless, "launching chrome");
        let mut child = Command::new(&chrome_path)
            .args(options.args(port, profile.path()))
            .envs(options.env())
            .arg("about:blank")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed {
                context: e.to_string(),
            })?;

        let ws_url = wait_for_ws_url(port, &mut child).await?;
        debug!(%ws_url, "connecting to page");

        let (ws, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| BrowserError::LaunchFailed {
                context: format!("WebSocket connect: {e}"),
            })?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<CdpCommand>(64);
        let handler = tokio::spawn(cdp_handler_loop(ws, cmd_rx, on_debug));

        let page = Self {
            cmd_tx,
            handler: Mutex::new(Some(handler)),
            chrome_process: Mutex::new(Some(child)),
            _profile: profile,
        };
        let _ = page.send_cdp("Page.enable", json!({})).await?;
        let _ = page.send_cdp("Runtime.enable", json!({})).await?;
        Ok(page)
    }

    async fn send_cdp(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CdpCommand {
                method: method.into(),
                params,
                response_tx: tx,
            })
            .await
            .map_err(|_| BrowserError::Transport("handler closed".into()))?;

        let result = tokio::time::timeout(COMMAND_TIMEOUT, rx)
            .await
            .map_err(|_| BrowserError::Timeout {
                timeout_ms: u64::try_from(COMMAND_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
                context: format!("CDP {method}"),
            })?
            .map_err(|_| BrowserError::Transport("response dropped".into()))?;

        result.map_err(BrowserError::Cdp)
    }
}

#[async_trait]
impl PageTarget for CdpPage {
    async fn set_device_metrics(&self, metrics: &DeviceMetrics) -> Result<(), BrowserError> {
        let _ = self
            .send_cdp(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": metrics.width,
                    "height": metrics.height,
                    "deviceScaleFactor": metrics.device_scale_factor,
                    "mobile": metrics.mobile,
                }),
            )
            .await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let result = self
            .send_cdp("Page.navigate", json!({ "url": url }))
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.into(),
                reason: e.to_string(),
            })?;
        match result["errorText"].as_str() {
            Some(reason) if !reason.is_empty() => Err(BrowserError::NavigationFailed {
                url: url.into(),
                reason: reason.into(),
            }),
            _ => Ok(()),
        }
    }

    async fn capture_execution_context(&self) -> Result<ExecutionContext, BrowserError> {
        let tree = self.send_cdp("Page.getFrameTree", json!({})).await?;
        tree["frameTree"]["frame"]["id"]
            .as_str()
            .map(ExecutionContext::new)
            .ok_or_else(|| BrowserError::Cdp("frame tree has no main frame".into()))
    }

    async fn start_screencast(&self, options: &ScreencastOptions) -> Result<(), BrowserError> {
        let _ = self
            .send_cdp(
                "Page.startScreencast",
                json!({
                    "format": options.format.as_str(),
                    "quality": options.quality,
                    "maxWidth": options.max_width,
                    "maxHeight": options.max_height,
                    "everyNthFrame": options.every_nth_frame,
                }),
            )
            .await?;
        Ok(())
    }

    async fn evaluate(
        &self,
        context: &ExecutionContext,
        script: &str,
    ) -> Result<Value, BrowserError> {
        debug!(frame_id = context.frame_id(), bytes = script.len(), "evaluating script");
        // no contextId: targets the main frame's current main world
        let result = self
            .send_cdp(
                "Runtime.evaluate",
                json!({
                    "expression": script,
                    "returnByValue": true,
                    "awaitPromise": false,
                    "userGesture": true,
                }),
            )
            .await
            .map_err(|e| BrowserError::Evaluation {
                reason: e.to_string(),
            })?;
        if let Some(exception) = result.get("exceptionDetails") {
            let msg = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("evaluation error");
            return Err(BrowserError::Evaluation { reason: msg.into() });
        }
        Ok(result["result"]["value"].clone())
    }

    async fn ack_screencast_frame(&self, session_id: i64) -> Result<(), BrowserError> {
        let _ = self
            .send_cdp("Page.screencastFrameAck", json!({ "sessionId": session_id }))
            .await?;
        Ok(())
    }

    async fn wait(&self) -> Result<(), BrowserError> {
        let Some(handler) = self.handler.lock().await.take() else {
            return Ok(());
        };
        handler
            .await
            .map_err(|e| BrowserError::Transport(format!("run loop panicked: {e}")))?
    }

    async fn close(&self) {
        if let Some(mut child) = self.chrome_process.lock().await.take() {
            let _ = child.kill().await;
            info!("chrome closed");
        }
    }
}

/// Poll the `/json` endpoint until Chrome lists a page target, and return
/// that page's WebSocket URL.
async fn wait_for_ws_url(port: u16, child: &mut Child) -> Result<String, BrowserError> {
    let url = format!("http://127.0.0.1:{port}/json");

    for _ in 0..STARTUP_POLLS {
        tokio::time::sleep(STARTUP_POLL).await;

        // Check Chrome hasn't crashed
        if let Some(status) = child.try_wait().map_err(|e| BrowserError::LaunchFailed {
            context: format!("wait: {e}"),
        })? {
            return Err(BrowserError::LaunchFailed {
                context: format!("Chrome exited early with {status}"),
            });
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets): Result<Vec<Value>, _> = resp.json().await else {
            continue;
        };
        // extensions register their own targets; only a page will do
        if let Some(ws_url) = page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(BrowserError::LaunchFailed {
        context: format!(
            "Chrome did not start within {}s on port {port}",
            (STARTUP_POLL * STARTUP_POLLS).as_secs()
        ),
    })
}

fn page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t["type"].as_str() == Some("page"))
        .find_map(|t| t["webSocketDebuggerUrl"].as_str())
        .map(String::from)
}

/// CDP WebSocket handler loop.
///
/// Sends commands, routes replies to their waiters and reports every
/// message through `on_debug`. Ends with `Ok` when the browser closes the
/// connection and `Err(Transport)` when the socket fails.
async fn cdp_handler_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<CdpCommand>,
    on_debug: DebugCallback,
) -> Result<(), BrowserError> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { return Ok(()) };
                let id = next_id;
                next_id += 1;
                let msg = json!({
                    "id": id,
                    "method": cmd.method,
                    "params": cmd.params,
                })
                .to_string();
                on_debug("-> %s", std::slice::from_ref(&msg));
                let _ = pending.insert(id, cmd.response_tx);
                ws_tx
                    .send(Message::Text(msg.into()))
                    .await
                    .map_err(|e| BrowserError::Transport(e.to_string()))?;
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    None | Some(Ok(Message::Close(_))) => return Ok(()),
                    Some(Err(e)) => return Err(BrowserError::Transport(e.to_string())),
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(_)) => continue,
                };
                on_debug("<- %s", std::slice::from_ref(&text));
                route_reply(&mut pending, &text);
            }
        }
    }
}

fn route_reply(pending: &mut HashMap<u64, PendingTx>, text: &str) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let Some(id) = val.get("id").and_then(Value::as_u64) else {
        return;
    };
    if let Some(tx) = pending.remove(&id) {
        if let Some(err) = val.get("error") {
            let msg = err["message"].as_str().unwrap_or("CDP error");
            let _ = tx.send(Err(msg.into()));
        } else {
            let _ = tx.send(Ok(val["result"].clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_page_target() {
        let targets = vec![
            json!({"type": "background_page", "webSocketDebuggerUrl": "ws://ext"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://page-1"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://page-2"}),
        ];
        assert_eq!(page_ws_url(&targets).as_deref(), Some("ws://page-1"));
    }

    #[test]
    fn no_page_target() {
        let targets = vec![json!({"type": "service_worker", "webSocketDebuggerUrl": "ws://sw"})];
        assert!(page_ws_url(&targets).is_none());
    }

    #[test]
    fn routes_result_and_error_replies() {
        let mut pending = HashMap::new();
        let (ok_tx, mut ok_rx) = oneshot::channel();
        let (err_tx, mut err_rx) = oneshot::channel();
        let _ = pending.insert(1, ok_tx);
        let _ = pending.insert(2, err_tx);

        route_reply(&mut pending, r#"{"id":1,"result":{"frameId":"F"}}"#);
        route_reply(&mut pending, r#"{"id":2,"error":{"code":-32000,"message":"Cannot navigate"}}"#);
        route_reply(&mut pending, r#"{"method":"Page.loadEventFired","params":{}}"#);

        assert_eq!(ok_rx.try_recv().unwrap().unwrap()["frameId"], "F");
        assert_eq!(err_rx.try_recv().unwrap().unwrap_err(), "Cannot navigate");
        assert!(pending.is_empty());
    }

    #[test]
    fn unknown_reply_id_is_ignored() {
        let mut pending: HashMap<u64, PendingTx> = HashMap::new();
        route_reply(&mut pending, r#"{"id":99,"result":{}}"#);
        route_reply(&mut pending, "garbage");
        assert!(pending.is_empty());
    }
}
