use crate::{
    config::{CONTENT_BINDING, ProcessFormat, TransformerConfig},
    error::{Error, Result},
    executer::{DefaultExecuter, Executer},
    gateway::{CompletionGateway, CompletionOptions, Prompt},
    naming::mirrored_path,
    progress::{ProgressEmitter, ProgressEvent, ProgressListener},
    walker::{TreeWalker, WalkEntry},
    writer::write_atomic_async,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, instrument, warn};

/// Separator placed between file contents in join mode.
pub const JOIN_SEPARATOR: &str = "\n\n";

/// Cancellation flag shared between a run and whoever may stop it.
///
/// The flag is checked before each file starts; a request that is already in
/// flight finishes first.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    stop: Arc<AtomicBool>,
}

impl RunHandle {
    /// Creates a handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the run to stop at the next file boundary.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

/// Where processing of one file broke down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStage {
    /// Reading the input file
    Read,
    /// The executer rejected the input
    Input,
    /// The completion request
    Gateway,
    /// The executer rejected the response
    Output,
    /// Writing the output file
    Write,
}

impl fmt::Display for FileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Read => "read",
            Self::Input => "input validation",
            Self::Gateway => "LLM request",
            Self::Output => "output validation",
            Self::Write => "write",
        };
        f.write_str(stage)
    }
}

/// Failure of a single file. Recorded in the [`RunSummary`]; never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("Error processing file {}: {stage} failed: {message}", .path.display())]
pub struct FileError {
    /// The input file (or content root in join mode)
    pub path: PathBuf,
    /// Failing step
    pub stage: FileStage,
    /// Underlying cause
    pub message: String,
}

impl FileError {
    fn new(path: &Path, stage: FileStage, cause: impl fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            stage,
            message: cause.to_string(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every discovered file was attempted
    Completed,
    /// The run was cancelled while files were still waiting
    Stopped,
}

/// Result of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Name of the transformer that ran
    pub transformer: String,

    /// Output files written, in processing order
    pub outputs: Vec<PathBuf>,

    /// Files that failed
    pub failures: Vec<FileError>,

    /// Files the run started on
    pub files_seen: usize,

    /// Whether cancellation left discovered files unprocessed
    pub stopped: bool,

    /// Start time
    pub started_at: DateTime<Local>,

    /// End time
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    fn start(transformer: &str) -> Self {
        let now = Local::now();
        Self {
            transformer: transformer.to_string(),
            outputs: Vec::new(),
            failures: Vec::new(),
            files_seen: 0,
            stopped: false,
            started_at: now,
            finished_at: now,
        }
    }

    /// How the run ended. Failed files do not make a run fail.
    #[must_use]
    pub const fn outcome(&self) -> RunOutcome {
        if self.stopped {
            RunOutcome::Stopped
        } else {
            RunOutcome::Completed
        }
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        let elapsed = (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default();

        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              Transformer Run Summary                  ║");
        println!("╠═══════════════════════════════════════════════════════╣");
        println!("║ Transformer: {:<41}║", self.transformer);
        println!("║ Outcome:     {:<41}║", format!("{:?}", self.outcome()));
        println!("║ Files Seen:           {:>8}                        ║", self.files_seen);
        println!("║ Outputs Written:      {:>8}                        ║", self.outputs.len());
        println!("║ Failed Files:         {:>8}                        ║", self.failures.len());
        println!("║ Duration:             {:>8.2}s                       ║", elapsed.as_secs_f64());
        println!("╚═══════════════════════════════════════════════════════╝");

        for output in &self.outputs {
            println!("  ✓ {}", output.display());
        }
        for failure in &self.failures {
            println!("  ✗ {failure}");
        }
        println!();
    }
}

/// Extra generation parameters not stored on the transformer.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Model override passed to the gateway
    pub model: Option<String>,
    /// Nucleus sampling cutoff passed to the gateway
    pub top_p: Option<f64>,
}

/// Runs one transformer over its `content` input.
///
/// For every file found below the content path the executor reads and
/// pre-processes the text, builds the prompt, asks the gateway, and writes the
/// response to the mirrored location under the output folder. A file that
/// fails is recorded and the run moves on to the next one.
pub struct BatchExecutor {
    gateway: Arc<dyn CompletionGateway>,
    executer: Arc<dyn Executer>,
    emitter: ProgressEmitter,
    handle: RunHandle,
    options: ExecutorOptions,
}

impl BatchExecutor {
    /// Creates an executor using `gateway` and the default hooks.
    pub fn new(gateway: impl CompletionGateway + 'static) -> Self {
        Self::from_shared(Arc::new(gateway))
    }

    /// Creates an executor around an already shared gateway.
    #[must_use]
    pub fn from_shared(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self {
            gateway,
            executer: Arc::new(DefaultExecuter),
            emitter: ProgressEmitter::new(),
            handle: RunHandle::new(),
            options: ExecutorOptions::default(),
        }
    }

    /// Replaces the per-file hooks.
    #[must_use]
    pub fn with_executer(self, executer: impl Executer + 'static) -> Self {
        self.with_shared_executer(Arc::new(executer))
    }

    /// Replaces the per-file hooks with an already shared implementation.
    #[must_use]
    pub fn with_shared_executer(mut self, executer: Arc<dyn Executer>) -> Self {
        self.executer = executer;
        self
    }

    /// Sets extra generation parameters.
    #[must_use]
    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the progress emitter, keeping its listeners.
    #[must_use]
    pub fn with_emitter(mut self, emitter: ProgressEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Registers a progress listener.
    pub fn on_progress(&mut self, listener: impl ProgressListener + 'static) {
        self.emitter.subscribe(listener);
    }

    /// Returns the cancellation handle of this executor.
    #[must_use]
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Stops the current run at the next file boundary.
    pub fn stop(&self) {
        self.handle.cancel();
    }

    /// Checks the paths a run depends on without touching anything.
    ///
    /// The `content` binding and bindings typed `file` or `folder` must name
    /// an existing file or directory; other required bindings must not be
    /// blank. The output folder must be an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first offending input or path.
    pub fn validate(config: &TransformerConfig) -> Result<()> {
        if config.input.is_empty() {
            return Err(Error::config("At least one valid input is required"));
        }

        for binding in &config.input {
            let is_path = binding.name == CONTENT_BINDING
                || matches!(binding.kind.as_str(), "file" | "folder" | "directory");

            if binding.value.trim().is_empty() {
                if is_path || binding.required {
                    return Err(Error::config(format!("Input \"{}\" is empty", binding.name)));
                }
                continue;
            }

            let path = Path::new(&binding.value);
            if is_path && !(path.is_file() || path.is_dir()) {
                return Err(Error::config(format!(
                    "Input \"{}\" path does not exist or is invalid: {}",
                    binding.name, binding.value
                )));
            }
        }

        if config.output_folder.as_os_str().is_empty() {
            return Err(Error::config("Output folder location is required"));
        }

        if !config.output_folder.is_dir() {
            return Err(Error::config(format!(
                "Output folder path is invalid or does not exist: {}",
                config.output_folder.display()
            )));
        }

        Ok(())
    }

    /// Runs the transformer and returns what was produced.
    ///
    /// Resets the cancellation flag first, so a stop requested before the run
    /// started has no effect.
    ///
    /// # Errors
    ///
    /// Returns an error, before any request is made, if validation fails or
    /// the `content` binding is missing, and returns an IO error if the output
    /// root cannot be created. Failures of individual files are reported in
    /// the summary instead.
    #[instrument(skip_all, fields(transformer = %config.name))]
    pub async fn execute(&self, config: &TransformerConfig) -> Result<RunSummary> {
        self.handle.reset();
        Self::validate(config)?;

        let content = config
            .content_binding()
            .ok_or_else(|| Error::config(format!("No input with name \"{CONTENT_BINDING}\" found")))?;

        tokio::fs::create_dir_all(&config.output_folder)
            .await
            .map_err(|e| Error::io(&config.output_folder, e))?;

        info!("Executing transformer over {}", content.value);
        let walker = TreeWalker::new(&content.value).excluding(&config.output_folder);
        let mut summary = RunSummary::start(&config.name);

        match config.process_format {
            ProcessFormat::EachFile => self.run_each(config, &walker, &mut summary).await,
            ProcessFormat::JoinFiles => self.run_joined(config, &walker, &mut summary).await,
        }

        summary.finished_at = Local::now();

        if summary.stopped {
            info!("Execution stopped after {} file(s)", summary.files_seen);
        } else {
            info!(
                "Transformation complete: {} output(s), {} failure(s)",
                summary.outputs.len(),
                summary.failures.len()
            );
        }

        Ok(summary)
    }

    async fn run_each(&self, config: &TransformerConfig, walker: &TreeWalker, summary: &mut RunSummary) {
        let mut walk = walker.iter();

        for entry in walk.by_ref() {
            if self.handle.is_cancelled() {
                summary.stopped = true;
                break;
            }
            summary.files_seen += 1;

            match self.process_file(config, &entry).await {
                Ok(output) => summary.outputs.push(output),
                Err(e) => {
                    error!("{}", e);
                    summary.failures.push(e);
                }
            }
        }

        if walk.errors() > 0 {
            warn!("{} entries could not be read while walking", walk.errors());
        }
    }

    async fn process_file(&self, config: &TransformerConfig, entry: &WalkEntry) -> std::result::Result<PathBuf, FileError> {
        let path = entry.absolute_path.as_path();
        self.emitter
            .emit(&ProgressEvent::current_input(path, &entry.relative_path));

        let data = self.read_input(config, path).await?;
        let output_file_name = self.executer.output_file_name(config, path);
        let message = self.executer.user_message(config, &data, &output_file_name);
        let response = self.complete(config, path, message).await?;

        let output = mirrored_path(&config.output_folder, &entry.relative_path, &output_file_name);
        self.write_output(path, &output, &response).await?;
        Ok(output)
    }

    async fn read_input(&self, config: &TransformerConfig, path: &Path) -> std::result::Result<String, FileError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FileError::new(path, FileStage::Read, e))?;

        if !self.executer.validate_input(config, path, &raw) {
            return Err(FileError::new(path, FileStage::Input, "input rejected"));
        }

        Ok(self.executer.pre_process_input(&raw))
    }

    async fn complete(&self, config: &TransformerConfig, path: &Path, message: String) -> std::result::Result<String, FileError> {
        let options = CompletionOptions {
            model: self.options.model.clone(),
            temperature: Some(config.temperature),
            max_tokens: config.max_tokens,
            top_p: self.options.top_p,
        };

        debug!("Sending request to {}", self.gateway.name());
        let response = self
            .gateway
            .send_completion(&Prompt::Text(message), &options)
            .await
            .map_err(|e| FileError::new(path, FileStage::Gateway, e))?;

        if !self.executer.validate_output(config, &response) {
            return Err(FileError::new(path, FileStage::Output, "response rejected"));
        }

        Ok(response)
    }

    async fn write_output(&self, input: &Path, output: &Path, response: &str) -> std::result::Result<(), FileError> {
        if let Some(dir) = output.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| FileError::new(input, FileStage::Write, e))?;
        }

        write_atomic_async(output, response.as_bytes())
            .await
            .map_err(|e| FileError::new(input, FileStage::Write, format!("{}: {e}", output.display())))?;

        self.emitter.emit(&ProgressEvent::output_created(output));
        Ok(())
    }

    async fn run_joined(&self, config: &TransformerConfig, walker: &TreeWalker, summary: &mut RunSummary) {
        let mut parts = Vec::new();
        let mut walk = walker.iter();

        for entry in walk.by_ref() {
            if self.handle.is_cancelled() {
                summary.stopped = true;
                return;
            }
            summary.files_seen += 1;

            self.emitter
                .emit(&ProgressEvent::current_input(&entry.absolute_path, &entry.relative_path));

            match self.read_input(config, &entry.absolute_path).await {
                Ok(data) => parts.push(data),
                Err(e) => {
                    error!("{}", e);
                    summary.failures.push(e);
                }
            }
        }

        if parts.is_empty() {
            return;
        }

        self.emitter.emit(&ProgressEvent::progress(format!(
            "Sending {} joined file(s) in one request",
            parts.len()
        )));

        let root = walker.root();
        let output_file_name = self.executer.output_file_name(config, root);
        let message = self
            .executer
            .user_message(config, &parts.join(JOIN_SEPARATOR), &output_file_name);

        let result = match self.complete(config, root, message).await {
            Ok(response) => {
                let output = config.output_folder.join(&output_file_name);
                self.write_output(root, &output, &response).await.map(|()| output)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => summary.outputs.push(output),
            Err(e) => {
                error!("{}", e);
                summary.failures.push(e);
            }
        }
    }
}

impl fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("gateway", &self.gateway.name())
            .field("emitter", &self.emitter)
            .field("handle", &self.handle)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputBinding;
    use crate::gateway::FnGateway;
    use crate::progress::EventSubType;
    use assert_fs::prelude::*;
    use std::sync::Mutex;

    fn echo() -> FnGateway<impl Fn(&Prompt, &CompletionOptions) -> Result<String> + Send + Sync> {
        FnGateway::new(|prompt: &Prompt, _: &CompletionOptions| {
            Ok(prompt.to_text().lines().next().unwrap_or_default().to_string())
        })
    }

    fn config(input: &Path, output: &Path) -> TransformerConfig {
        TransformerConfig::builder()
            .id("t")
            .name("Test")
            .description("test")
            .prompt("Echo: {{content}}")
            .input(InputBinding::content(input))
            .output_folder(output)
            .output_file_name("*.out")
            .build()
            .unwrap()
    }

    fn recorder(executor: &mut BatchExecutor) -> Arc<Mutex<Vec<ProgressEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        executor.on_progress(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone()));
        events
    }

    #[tokio::test]
    async fn test_mirrors_input_tree() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("  alpha \n").unwrap();
        temp.child("in/sub/b.txt").write_str("beta").unwrap();
        temp.child("in/.hidden").write_str("nope").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let executor = BatchExecutor::new(echo());
        let summary = executor
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(summary.outcome(), RunOutcome::Completed);
        assert_eq!(summary.outputs.len(), 2);
        temp.child("out/a.out").assert("Echo: alpha");
        temp.child("out/sub/b.out").assert("Echo: beta");
        assert!(!temp.child("out/.hidden.out").exists());
    }

    #[tokio::test]
    async fn test_single_file_input() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("notes/abc.txt").write_str("one").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let executor = BatchExecutor::new(echo());
        let summary = executor
            .execute(&config(&temp.path().join("notes/abc.txt"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(summary.outputs, vec![temp.path().join("out/abc.out")]);
    }

    #[tokio::test]
    async fn test_prompt_carries_output_instruction() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("x").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let prompts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&prompts);
        let gateway = FnGateway::new(move |p: &Prompt, o: &CompletionOptions| {
            seen.lock().unwrap().push((p.to_text(), o.temperature));
            Ok(String::new())
        });

        BatchExecutor::new(gateway)
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.starts_with("Echo: x\n"));
        assert!(prompts[0].0.ends_with("extension .out . Make sure the response only contains data of that type."));
        assert_eq!(prompts[0].1, Some(0.7));
    }

    #[tokio::test]
    async fn test_cancellation_halts_remaining_work() {
        let temp = assert_fs::TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            temp.child(format!("in/{name}")).write_str(name).unwrap();
        }
        temp.child("out").create_dir_all().unwrap();

        let mut executor = BatchExecutor::new(echo());
        let handle = executor.handle();
        executor.on_progress(move |e: &ProgressEvent| {
            if e.sub_type == EventSubType::CurrentInput {
                handle.cancel();
            }
        });

        let summary = executor
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert!(summary.outputs.len() <= 1);
        assert_eq!(summary.files_seen, 1);
        assert_eq!(summary.outcome(), RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stop_during_last_file_still_completes() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/only.txt").write_str("x").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let mut executor = BatchExecutor::new(echo());
        let handle = executor.handle();
        executor.on_progress(move |e: &ProgressEvent| {
            if e.sub_type == EventSubType::CurrentInput {
                handle.cancel();
            }
        });

        let summary = executor
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(summary.outputs.len(), 1);
        assert_eq!(summary.outcome(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_output_folder_inside_input_is_not_read_back() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();
        temp.child("in/zout").create_dir_all().unwrap();

        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let gateway = FnGateway::new(move |_: &Prompt, _: &CompletionOptions| {
            *counter.lock().unwrap() += 1;
            Ok("done".to_string())
        });

        let mut config = config(&temp.path().join("in"), &temp.path().join("in/zout"));
        config.output_file_name = None;

        let summary = BatchExecutor::new(gateway).execute(&config).await.unwrap();

        assert_eq!(summary.outputs, vec![temp.path().join("in/zout/a.txt")]);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(!temp.child("in/zout/zout").exists());
    }

    #[tokio::test]
    async fn test_failed_file_does_not_abort_batch() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.bin").write_binary(&[0xff, 0xfe, 0xfd]).unwrap();
        temp.child("in/b.txt").write_str("fine").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let executor = BatchExecutor::new(echo());
        let summary = executor
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(summary.outputs, vec![temp.path().join("out/b.out")]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].stage, FileStage::Read);
        assert_eq!(summary.outcome(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_gateway_error_is_isolated() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("boom").unwrap();
        temp.child("in/b.txt").write_str("ok").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let gateway = FnGateway::new(|p: &Prompt, _: &CompletionOptions| {
            if p.to_text().contains("boom") {
                Err(Error::gateway("provider unavailable"))
            } else {
                Ok("done".to_string())
            }
        });

        let summary = BatchExecutor::new(gateway)
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(summary.outputs.len(), 1);
        assert_eq!(summary.failures[0].stage, FileStage::Gateway);
        assert!(summary.failures[0].message.contains("provider unavailable"));
        assert!(!temp.child("out/a.out").exists());
    }

    #[tokio::test]
    async fn test_event_order() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();
        temp.child("in/b.txt").write_str("b").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let mut executor = BatchExecutor::new(echo());
        let events = recorder(&mut executor);
        executor
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.sub_type).collect();
        assert_eq!(
            kinds,
            vec![
                EventSubType::CurrentInput,
                EventSubType::OutputCreated,
                EventSubType::CurrentInput,
                EventSubType::OutputCreated,
            ]
        );
    }

    #[tokio::test]
    async fn test_validation_runs_before_any_request() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();

        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let gateway = FnGateway::new(move |_: &Prompt, _: &CompletionOptions| {
            *counter.lock().unwrap() += 1;
            Ok(String::new())
        });

        let err = BatchExecutor::new(gateway)
            .execute(&config(&temp.path().join("in"), &temp.path().join("missing-out")))
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(err.to_string().contains("Output folder"));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_validate_paths() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in.txt").write_str("a").unwrap();
        let mut config = config(&temp.path().join("in.txt"), temp.path());
        assert!(BatchExecutor::validate(&config).is_ok());

        config.input.push(InputBinding::new("tone", "friendly"));
        assert!(BatchExecutor::validate(&config).is_ok());

        config.input.push(InputBinding::new("glossary", "/no/such/file").with_kind("file"));
        let err = BatchExecutor::validate(&config).unwrap_err();
        assert!(err.to_string().contains("glossary"));

        config.input.truncate(1);
        config.input[0].value = String::new();
        assert!(BatchExecutor::validate(&config).unwrap_err().to_string().contains("is empty"));
    }

    #[tokio::test]
    async fn test_missing_content_binding() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("style.md").write_str("s").unwrap();
        let mut config = config(&temp.path().join("style.md"), temp.path());
        config.input[0].name = "style".to_string();

        let err = BatchExecutor::new(echo()).execute(&config).await.unwrap_err();
        assert!(err.to_string().contains("No input with name \"content\""));
    }

    #[tokio::test]
    async fn test_empty_directory_is_not_an_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in").create_dir_all().unwrap();

        let summary = BatchExecutor::new(echo())
            .execute(&config(&temp.path().join("in"), temp.path()))
            .await
            .unwrap();

        assert!(summary.is_empty());
        assert_eq!(summary.outcome(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_join_mode_sends_one_request() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("chapters/01.md").write_str(" one \n").unwrap();
        temp.child("chapters/02.md").write_str("two").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let prompts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&prompts);
        let gateway = FnGateway::new(move |p: &Prompt, _: &CompletionOptions| {
            seen.lock().unwrap().push(p.to_text());
            Ok("book".to_string())
        });

        let mut config = config(&temp.path().join("chapters"), &temp.path().join("out"));
        config.prompt = "{{content}}".to_string();
        config.output_file_name = Some("*_all.md".to_string());
        config.process_format = ProcessFormat::JoinFiles;

        let summary = BatchExecutor::new(gateway).execute(&config).await.unwrap();

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("one\n\ntwo\n"));
        assert_eq!(summary.files_seen, 2);
        assert_eq!(summary.outputs, vec![temp.path().join("out/chapters_all.md")]);
        temp.child("out/chapters_all.md").assert("book");
    }

    struct RejectShort;

    impl Executer for RejectShort {
        fn validate_input(&self, _: &TransformerConfig, _: &Path, data: &str) -> bool {
            data.len() > 3
        }
    }

    #[tokio::test]
    async fn test_custom_executer_rejects_input() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("no").unwrap();
        temp.child("in/b.txt").write_str("long enough").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let summary = BatchExecutor::new(echo())
            .with_executer(RejectShort)
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(summary.outputs.len(), 1);
        assert_eq!(summary.failures[0].stage, FileStage::Input);
    }
}
