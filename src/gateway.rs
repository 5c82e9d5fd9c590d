//! The boundary to a completion provider.
//!
//! The executor only knows [`CompletionGateway`]: a prompt goes in, the
//! response text comes out, or the call fails. Concrete providers live behind
//! it. This module ships the building blocks the engine and the CLI need:
//!
//! - [`CommandGateway`]: pipes the prompt into an external program
//! - [`FnGateway`]: wraps a closure, handy for embedding and tests
//! - [`TimeoutGateway`]: bounds every call of another gateway
//! - [`TranscriptGateway`]: records every request and response on disk

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// End-user turn
    User,
    /// Model turn
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,
    /// Text
    pub content: String,
}

impl Message {
    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// What is sent to the provider: a flat prompt or a message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// A single user prompt
    Text(String),
    /// A structured conversation
    Messages(Vec<Message>),
}

impl Prompt {
    /// Returns the conversation form; a flat prompt becomes one user message.
    #[must_use]
    pub fn to_messages(&self) -> Vec<Message> {
        match self {
            Self::Text(text) => vec![Message::user(text.clone())],
            Self::Messages(messages) => messages.clone(),
        }
    }

    /// Returns the plain text form; message contents are joined by newlines.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Messages(messages) => messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

/// Generation parameters passed along with a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Provider model name
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Upper bound on generated tokens
    pub max_tokens: Option<u32>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f64>,
}

/// A completion provider.
///
/// Implementations surface provider failures as errors and perform no
/// retries; the caller decides what a failure means.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Sends one prompt and returns the response text.
    async fn send_completion(&self, prompt: &Prompt, options: &CompletionOptions)
    -> Result<String>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "llm"
    }
}

#[async_trait]
impl<G: CompletionGateway + ?Sized> CompletionGateway for Arc<G> {
    async fn send_completion(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String> {
        (**self).send_completion(prompt, options).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Gateway backed by a synchronous closure.
///
/// # Examples
///
/// ```
/// use llm_transformer::gateway::{FnGateway, Prompt};
///
/// let upper = FnGateway::new(|prompt: &Prompt, _opts: &_| Ok(prompt.to_text().to_uppercase()));
/// ```
pub struct FnGateway<F> {
    reply: F,
}

impl<F> FnGateway<F>
where
    F: Fn(&Prompt, &CompletionOptions) -> Result<String> + Send + Sync,
{
    /// Wraps `reply`.
    pub const fn new(reply: F) -> Self {
        Self { reply }
    }
}

#[async_trait]
impl<F> CompletionGateway for FnGateway<F>
where
    F: Fn(&Prompt, &CompletionOptions) -> Result<String> + Send + Sync,
{
    async fn send_completion(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String> {
        (self.reply)(prompt, options)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Gateway that runs an external program per request.
///
/// The prompt text is written to the program's stdin and its stdout is the
/// response. Options are exported as `LLM_MODEL`, `LLM_TEMPERATURE`,
/// `LLM_MAX_TOKENS` and `LLM_TOP_P`. A non-zero exit status fails the call
/// with the program's stderr as the message.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    program: String,
    args: Vec<String>,
}

impl CommandGateway {
    /// Creates a gateway for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Parses a whitespace separated command line such as `ollama run llama3`.
    ///
    /// Quotes are not interpreted, so `llm -s "be terse"` yields the arguments
    /// `-s`, `"be` and `terse"`. Pass arguments containing spaces through
    /// [`args`](Self::args) instead.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `command_line` is blank.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::config("LLM command must not be empty"))?;
        Ok(Self::new(program).args(parts))
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl CompletionGateway for CommandGateway {
    async fn send_completion(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String> {
        debug!("Executing command: {} {}", self.program, self.args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(model) = &options.model {
            cmd.env("LLM_MODEL", model);
        }
        if let Some(temperature) = options.temperature {
            cmd.env("LLM_TEMPERATURE", temperature.to_string());
        }
        if let Some(max_tokens) = options.max_tokens {
            cmd.env("LLM_MAX_TOKENS", max_tokens.to_string());
        }
        if let Some(top_p) = options.top_p {
            cmd.env("LLM_TOP_P", top_p.to_string());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::gateway(format!("failed to start '{}': {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::gateway("child stdin is not piped"))?;
        let text = prompt.to_text();

        let feed = async move {
            let result = stdin.write_all(text.as_bytes()).await;
            drop(stdin);
            result
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output
            .map_err(|e| Error::gateway(format!("failed to wait for '{}': {e}", self.program)))?;
        if let Err(e) = fed {
            // The program may exit without reading everything; its status decides.
            trace!("Prompt was not fully written to '{}': {}", self.program, e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::gateway(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| Error::gateway(format!("'{}' wrote invalid UTF-8", self.program)))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Bounds every call of an inner gateway.
///
/// A call that does not finish within the limit is dropped and fails with
/// [`Error::Timeout`].
pub struct TimeoutGateway<G> {
    inner: G,
    after: Duration,
}

impl<G: CompletionGateway> TimeoutGateway<G> {
    /// Wraps `inner` with a per-call limit.
    pub const fn new(inner: G, after: Duration) -> Self {
        Self { inner, after }
    }
}

#[async_trait]
impl<G: CompletionGateway> CompletionGateway for TimeoutGateway<G> {
    async fn send_completion(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String> {
        tokio::time::timeout(self.after, self.inner.send_completion(prompt, options))
            .await
            .map_err(|_| Error::Timeout { after: self.after })?
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Records every request and response of an inner gateway.
///
/// Files land in `<dir>/<label>/<YYYY-MM-DD>/<HH-MM-SS.mmm>_req.txt` and
/// `_res.txt`. Recording problems are logged and never fail the call.
pub struct TranscriptGateway<G> {
    inner: G,
    dir: PathBuf,
    label: String,
}

impl<G: CompletionGateway> TranscriptGateway<G> {
    /// Wraps `inner`, recording under `dir/label`.
    pub fn new(inner: G, dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            inner,
            dir: dir.into(),
            label: sanitize_label(&label.into()),
        }
    }

    async fn record(&self, prompt: &Prompt, response: &str) -> std::io::Result<()> {
        let now = chrono::Local::now();
        let day_dir = self
            .dir
            .join(&self.label)
            .join(now.format("%Y-%m-%d").to_string());
        tokio::fs::create_dir_all(&day_dir).await?;

        let stamp = now.format("%H-%M-%S%.3f").to_string();
        tokio::fs::write(day_dir.join(format!("{stamp}_req.txt")), prompt.to_text()).await?;
        tokio::fs::write(day_dir.join(format!("{stamp}_res.txt")), response).await
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "transformer".to_string() } else { cleaned }
}

#[async_trait]
impl<G: CompletionGateway> CompletionGateway for TranscriptGateway<G> {
    async fn send_completion(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String> {
        let response = self.inner.send_completion(prompt, options).await?;
        if let Err(e) = self.record(prompt, &response).await {
            warn!("Failed to record transcript in {}: {}", self.dir.display(), e);
        }
        Ok(response)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    struct Sleepy;

    #[async_trait]
    impl CompletionGateway for Sleepy {
        async fn send_completion(&self, _: &Prompt, _: &CompletionOptions) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[test]
    fn test_prompt_forms() {
        let prompt = Prompt::from(vec![Message::system("Be terse."), Message::user("Hi")]);
        assert_eq!(prompt.to_text(), "Be terse.\nHi");
        assert_eq!(Prompt::from("Hi").to_messages(), vec![Message::user("Hi")]);
    }

    #[test]
    fn test_role_wire_format() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
    }

    #[tokio::test]
    async fn test_fn_gateway_echoes() {
        let gateway = FnGateway::new(|p: &Prompt, _: &CompletionOptions| Ok(p.to_text()));
        let reply = gateway
            .send_completion(&"ping".into(), &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "ping");
    }

    #[tokio::test]
    async fn test_timeout_gateway_fails_slow_calls() {
        let gateway = TimeoutGateway::new(Sleepy, Duration::from_millis(20));
        let err = gateway
            .send_completion(&"x".into(), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_gateway_pipes_prompt() {
        let gateway = CommandGateway::from_command_line("cat").unwrap();
        let reply = gateway
            .send_completion(&"hello from stdin".into(), &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "hello from stdin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_gateway_reports_failure() {
        let gateway = CommandGateway::new("false");
        let err = gateway
            .send_completion(&"x".into(), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[test]
    fn test_command_line_splits_on_whitespace_only() {
        let gateway = CommandGateway::from_command_line(r#"llm  -s "be terse""#).unwrap();
        assert_eq!(gateway.program, "llm");
        assert_eq!(gateway.args, vec!["-s", "\"be", "terse\""]);

        let gateway = CommandGateway::new("llm").args(["-s", "be terse"]);
        assert_eq!(gateway.args, vec!["-s", "be terse"]);
    }

    #[test]
    fn test_blank_command_line_rejected() {
        assert!(CommandGateway::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn test_transcript_gateway_records_exchange() {
        let temp = assert_fs::TempDir::new().unwrap();
        let gateway = TranscriptGateway::new(
            FnGateway::new(|_: &Prompt, _: &CompletionOptions| Ok("answer".to_string())),
            temp.path(),
            "My Transformer",
        );

        gateway
            .send_completion(&"question".into(), &CompletionOptions::default())
            .await
            .unwrap();

        let label_dir = temp.child("My_Transformer");
        assert!(label_dir.exists());
        let day = std::fs::read_dir(label_dir.path()).unwrap().next().unwrap().unwrap();
        let mut names: Vec<String> = std::fs::read_dir(day.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("_req.txt"));
        assert!(names[1].ends_with("_res.txt"));
    }
}
