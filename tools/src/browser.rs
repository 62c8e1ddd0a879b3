//! Headless-browser automation tool.
//!
//! One Chromium session per task, driven over CDP. Every action returns a
//! screenshot plus the console logs captured since the previous action, so
//! the model can see what its interaction did.

use std::sync::{Arc, Mutex as StdMutex};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::Page;
use chromiumoxide::handler::viewport::Viewport;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use scribe_types::{AskKind, SayKind, ToolParamName, ToolParams, ToolUseName};

use crate::{
    Approval, Tool, ToolContext, ToolError, ToolFut, ToolResponse, denied_response,
    denied_with_feedback_response, present_partial, request_approval, require_param,
};

const VIEWPORT_WIDTH: u32 = 900;
const VIEWPORT_HEIGHT: u32 = 600;
const SCROLL_STEP_PX: i32 = 600;

/// The browser actions the model may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowserAction {
    Launch,
    Click,
    Type,
    ScrollDown,
    ScrollUp,
    Close,
}

impl BrowserAction {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "launch" => Some(Self::Launch),
            "click" => Some(Self::Click),
            "type" => Some(Self::Type),
            "scroll_down" => Some(Self::ScrollDown),
            "scroll_up" => Some(Self::ScrollUp),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

/// Result of one browser action.
#[derive(Debug, Clone, Default)]
pub struct BrowserActionResult {
    /// Base64 PNG of the viewport after the action.
    pub screenshot: Option<String>,
    /// Console output captured since the previous action.
    pub logs: String,
    pub url: Option<String>,
}

struct ActiveBrowser {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    log_task: JoinHandle<()>,
    console_logs: Arc<StdMutex<Vec<String>>>,
}

/// A lazily-launched headless Chromium session shared across actions.
#[derive(Default)]
pub struct BrowserSession {
    inner: Mutex<Option<ActiveBrowser>>,
}

impl BrowserSession {
    async fn launch(&self, url: &str) -> anyhow::Result<BrowserActionResult> {
        self.close().await;

        let config = BrowserConfig::builder()
            .new_headless_mode()
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .args(vec![
                "--disable-gpu".to_string(),
                "--no-first-run".to_string(),
                "--no-default-browser-check".to_string(),
            ])
            .build()
            .map_err(|e| anyhow::anyhow!("failed to configure chromium: {e}"))?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser.new_page("about:blank").await?;

        let console_logs = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&console_logs);
        let mut events = page.event_listener::<EventConsoleApiCalled>().await?;
        let log_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let parts: Vec<String> = event
                    .args
                    .iter()
                    .filter_map(|arg| arg.value.as_ref().map(std::string::ToString::to_string))
                    .collect();
                let mut logs = sink.lock().expect("console log lock poisoned");
                logs.push(format!("[{:?}] {}", event.r#type, parts.join(" ")));
            }
        });

        page.goto(url).await?;
        let _ = page.wait_for_navigation().await;

        let mut inner = self.inner.lock().await;
        *inner = Some(ActiveBrowser {
            browser,
            page,
            handler_task,
            log_task,
            console_logs,
        });
        drop(inner);

        self.capture_result().await
    }

    async fn click(&self, x: i64, y: i64) -> anyhow::Result<BrowserActionResult> {
        {
            let inner = self.inner.lock().await;
            let active = inner
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("browser is not launched"))?;

            let press = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MousePressed)
                .x(x as f64)
                .y(y as f64)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(|e| anyhow::anyhow!("bad mouse event: {e}"))?;
            active.page.execute(press).await?;

            let release = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseReleased)
                .x(x as f64)
                .y(y as f64)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(|e| anyhow::anyhow!("bad mouse event: {e}"))?;
            active.page.execute(release).await?;
        }
        // Give any triggered navigation or rendering a moment to settle.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        self.capture_result().await
    }

    async fn type_text(&self, text: &str) -> anyhow::Result<BrowserActionResult> {
        {
            let inner = self.inner.lock().await;
            let active = inner
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("browser is not launched"))?;
            active
                .page
                .execute(InsertTextParams::new(text.to_string()))
                .await?;
        }
        self.capture_result().await
    }

    async fn scroll(&self, delta_y: i32) -> anyhow::Result<BrowserActionResult> {
        {
            let inner = self.inner.lock().await;
            let active = inner
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("browser is not launched"))?;
            active
                .page
                .evaluate(format!("window.scrollBy(0, {delta_y})"))
                .await?;
        }
        self.capture_result().await
    }

    /// Tear down the browser if running. Safe to call when idle.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(active) = inner.take() {
            active.log_task.abort();
            let mut browser = active.browser;
            if let Err(e) = browser.close().await {
                tracing::warn!("browser close failed: {e}");
            }
            let _ = browser.wait().await;
            active.handler_task.abort();
        }
    }

    async fn capture_result(&self) -> anyhow::Result<BrowserActionResult> {
        let inner = self.inner.lock().await;
        let Some(active) = inner.as_ref() else {
            return Ok(BrowserActionResult::default());
        };

        let screenshot = match active
            .page
            .execute(
                CaptureScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
        {
            Ok(response) => {
                let b64: &str = response.result.data.as_ref();
                Some(format!("data:image/png;base64,{b64}"))
            }
            Err(e) => {
                tracing::warn!("screenshot capture failed: {e}");
                None
            }
        };

        let logs = {
            let mut sink = active.console_logs.lock().expect("console log lock poisoned");
            std::mem::take(&mut *sink).join("\n")
        };
        let url = active.page.url().await.ok().flatten();

        Ok(BrowserActionResult {
            screenshot,
            logs,
            url,
        })
    }
}

fn parse_coordinate(raw: &str) -> Option<(i64, i64)> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '-')
        .collect();
    let (x, y) = cleaned.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

pub struct BrowserActionTool {
    session: Arc<BrowserSession>,
}

impl BrowserActionTool {
    #[must_use]
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }

    fn format_response(result: &BrowserActionResult, action_desc: &str) -> ToolResponse {
        let mut text = format!("Browser action performed: {action_desc}");
        if let Some(url) = &result.url {
            text.push_str(&format!("\nCurrent URL: {url}"));
        }
        if result.logs.is_empty() {
            text.push_str("\n(no new console output)");
        } else {
            text.push_str(&format!("\nConsole output:\n{}", result.logs));
        }
        ToolResponse {
            text,
            images: result.screenshot.iter().cloned().collect(),
            rejected: false,
            invalid_params: false,
        }
    }
}

impl Tool for BrowserActionTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::BrowserAction
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        params: &'a ToolParams,
        partial: bool,
    ) -> ToolFut<'a> {
        Box::pin(async move {
            let tool = self.name();
            let action_param = params
                .get(&ToolParamName::Action)
                .cloned()
                .unwrap_or_default();

            if partial {
                let message = json!({
                    "action": action_param,
                    "url": params.get(&ToolParamName::Url),
                })
                .to_string();
                present_partial(ctx, tool, AskKind::BrowserActionLaunch, message).await?;
                return Ok(ToolResponse::empty());
            }

            let action_raw = require_param(tool, params, ToolParamName::Action)?;
            let action =
                BrowserAction::parse(action_raw).ok_or_else(|| ToolError::InvalidParam {
                    tool,
                    param: ToolParamName::Action,
                    message: format!(
                        "unknown action '{action_raw}' (expected launch, click, type, scroll_down, scroll_up, or close)"
                    ),
                })?;

            let outcome = match action {
                BrowserAction::Launch => {
                    let url = require_param(tool, params, ToolParamName::Url)?;
                    match request_approval(
                        ctx,
                        tool,
                        AskKind::BrowserActionLaunch,
                        url.to_string(),
                    )
                    .await?
                    {
                        Approval::Approved | Approval::AutoApproved => {}
                        Approval::Denied => {
                            return Ok(denied_response(&format!("launch browser at {url}")));
                        }
                        Approval::DeniedWithFeedback { text, .. } => {
                            return Ok(denied_with_feedback_response(
                                &format!("launch browser at {url}"),
                                &text,
                            ));
                        }
                    }
                    self.session
                        .launch(url)
                        .await
                        .map(|r| (r, format!("launched at {url}")))
                }
                BrowserAction::Click => {
                    let raw = require_param(tool, params, ToolParamName::Coordinate)?;
                    let (x, y) = parse_coordinate(raw).ok_or_else(|| ToolError::InvalidParam {
                        tool,
                        param: ToolParamName::Coordinate,
                        message: format!("expected 'x,y', got '{raw}'"),
                    })?;
                    ctx.ui
                        .say(
                            SayKind::BrowserAction,
                            Some(format!("click ({x},{y})")),
                            None,
                            false,
                        )
                        .await?;
                    self.session
                        .click(x, y)
                        .await
                        .map(|r| (r, format!("clicked ({x},{y})")))
                }
                BrowserAction::Type => {
                    let text = require_param(tool, params, ToolParamName::Text)?;
                    ctx.ui
                        .say(
                            SayKind::BrowserAction,
                            Some(format!("type \"{text}\"")),
                            None,
                            false,
                        )
                        .await?;
                    self.session
                        .type_text(text)
                        .await
                        .map(|r| (r, format!("typed \"{text}\"")))
                }
                BrowserAction::ScrollDown => {
                    ctx.ui
                        .say(
                            SayKind::BrowserAction,
                            Some("scroll down".to_string()),
                            None,
                            false,
                        )
                        .await?;
                    self.session
                        .scroll(SCROLL_STEP_PX)
                        .await
                        .map(|r| (r, "scrolled down".to_string()))
                }
                BrowserAction::ScrollUp => {
                    ctx.ui
                        .say(
                            SayKind::BrowserAction,
                            Some("scroll up".to_string()),
                            None,
                            false,
                        )
                        .await?;
                    self.session
                        .scroll(-SCROLL_STEP_PX)
                        .await
                        .map(|r| (r, "scrolled up".to_string()))
                }
                BrowserAction::Close => {
                    ctx.ui
                        .say(
                            SayKind::BrowserAction,
                            Some("close browser".to_string()),
                            None,
                            false,
                        )
                        .await?;
                    self.session.close().await;
                    return Ok(ToolResponse::text("Browser closed."));
                }
            };

            let (result, description) = outcome.map_err(|e| ToolError::Execution {
                tool,
                message: e.to_string(),
            })?;

            ctx.ui
                .say(
                    SayKind::BrowserActionResult,
                    Some(json!({"action": action_raw, "url": result.url}).to_string()),
                    result.screenshot.clone().map(|s| vec![s]),
                    false,
                )
                .await?;

            Ok(Self::format_response(&result, &description))
        })
    }

    fn abort<'a>(&'a self) -> futures_util::future::BoxFuture<'a, ()> {
        Box::pin(async move {
            self.session.close().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scribe_types::{AutoApprovalSettings, ToolParamName, ToolParams, ToolUseName};

    use crate::testing::ScriptedUi;
    use crate::{ApprovalGate, Tool, ToolContext};

    use super::{BrowserAction, BrowserActionTool, BrowserSession, parse_coordinate};

    fn ctx() -> ToolContext {
        ToolContext {
            cwd: std::env::temp_dir(),
            ui: Arc::new(ScriptedUi::default()),
            approval: Arc::new(ApprovalGate::new(AutoApprovalSettings::default())),
        }
    }

    #[test]
    fn coordinates_parse_from_plain_and_decorated_forms() {
        assert_eq!(parse_coordinate("450,300"), Some((450, 300)));
        assert_eq!(parse_coordinate("<coordinate>12,34"), Some((12, 34)));
        assert_eq!(parse_coordinate("garbage"), None);
    }

    #[test]
    fn actions_parse_from_grammar() {
        assert_eq!(BrowserAction::parse("launch"), Some(BrowserAction::Launch));
        assert_eq!(
            BrowserAction::parse("scroll_down"),
            Some(BrowserAction::ScrollDown)
        );
        assert_eq!(BrowserAction::parse("explode"), None);
    }

    #[tokio::test]
    async fn unknown_action_is_validation_error() {
        let tool = BrowserActionTool::new(Arc::new(BrowserSession::default()));
        let params: ToolParams = [(ToolParamName::Action, "explode".to_string())]
            .into_iter()
            .collect();
        let err = tool.execute(&ctx(), &params, false).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn click_without_launch_is_execution_error() {
        let tool = BrowserActionTool::new(Arc::new(BrowserSession::default()));
        let params: ToolParams = [
            (ToolParamName::Action, "click".to_string()),
            (ToolParamName::Coordinate, "10,10".to_string()),
        ]
        .into_iter()
        .collect();
        let err = tool.execute(&ctx(), &params, false).await.unwrap_err();
        assert!(!err.is_validation());
        assert!(err.to_string().contains("not launched"));
    }

    #[tokio::test]
    async fn close_when_idle_is_a_no_op() {
        let session = BrowserSession::default();
        session.close().await;
    }

    #[test]
    fn name_matches_grammar() {
        let tool = BrowserActionTool::new(Arc::new(BrowserSession::default()));
        assert_eq!(tool.name(), ToolUseName::BrowserAction);
    }
}
