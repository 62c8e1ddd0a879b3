//! Stdin/stdout front end.
//!
//! Renders says as prefixed lines and blocks on stdin for asks. Partial
//! says overwrite the current line so streamed text and command output
//! update in place.

use futures_util::future::BoxFuture;
use std::io::Write as _;

use scribe_engine::FrontEnd;
use scribe_types::{AskKind, AskResponse, SayKind};

pub struct StdioFrontEnd;

impl StdioFrontEnd {
    fn prompt_for(kind: AskKind) -> &'static str {
        match kind {
            AskKind::Followup => "The assistant asks",
            AskKind::Command => "Run this command? [y/n/feedback]",
            AskKind::Tool => "Approve this action? [y/n/feedback]",
            AskKind::BrowserActionLaunch => "Launch the browser here? [y/n/feedback]",
            AskKind::ApiReqFailed => "Request failed. Retry? [y/n]",
            AskKind::MistakeLimitReached => "The assistant is stuck. Guidance? [text/n]",
            AskKind::AutoApprovalMaxReached => "Auto-approval cap reached. Continue? [y/n]",
            AskKind::CompletionResult => "Accept the result? [enter/feedback]",
            AskKind::ResumeTask => "Resume this task? [y/n/new instructions]",
        }
    }

    async fn read_line() -> anyhow::Result<String> {
        // Stdin reads are blocking; keep them off the async threads.
        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await??;
        Ok(line.trim().to_string())
    }

    fn parse_response(line: &str) -> AskResponse {
        match line.to_ascii_lowercase().as_str() {
            "" | "y" | "yes" => AskResponse::Yes,
            "n" | "no" => AskResponse::No,
            _ => AskResponse::Message {
                text: line.to_string(),
                images: Vec::new(),
            },
        }
    }
}

impl FrontEnd for StdioFrontEnd {
    fn ask<'a>(
        &'a self,
        kind: AskKind,
        text: &'a str,
        partial: bool,
    ) -> BoxFuture<'a, anyhow::Result<AskResponse>> {
        Box::pin(async move {
            if partial {
                // Preview of a forming question; never blocks.
                print!("\r\x1b[2K[pending] {}", one_line(text));
                let _ = std::io::stdout().flush();
                return Ok(AskResponse::Yes);
            }

            println!();
            if text.is_empty() {
                println!("{}", Self::prompt_for(kind));
            } else {
                println!("{}\n{}", text, Self::prompt_for(kind));
            }
            print!("> ");
            let _ = std::io::stdout().flush();
            let line = Self::read_line().await?;
            Ok(Self::parse_response(&line))
        })
    }

    fn say<'a>(
        &'a self,
        kind: SayKind,
        text: Option<&'a str>,
        partial: bool,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(text) = text else { return };
            if partial {
                print!("\r\x1b[2K{}", one_line(text));
                let _ = std::io::stdout().flush();
                return;
            }
            match kind {
                SayKind::Task => println!("Task: {text}"),
                SayKind::Text | SayKind::CompletionResult => println!("\n{text}"),
                SayKind::CommandOutput => println!("\r\x1b[2K{text}"),
                SayKind::Error => eprintln!("error: {text}"),
                SayKind::ApiReqStarted | SayKind::ApiReqRetried => {
                    tracing::debug!(kind = ?kind, "{text}");
                }
                _ => println!("[{kind:?}] {text}"),
            }
        })
    }
}

/// Collapse to a single trailing line for in-place updates.
fn one_line(text: &str) -> String {
    match text.rsplit_once('\n') {
        Some((_, last)) => last.to_string(),
        None => text.to_string(),
    }
}
