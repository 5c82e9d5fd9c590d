use crate::{
    config::TransformerConfig,
    error::{Error, Result},
    executer::{DefaultExecuter, Executer},
    executor::{BatchExecutor, ExecutorOptions, RunHandle, RunSummary},
    gateway::{CompletionGateway, TimeoutGateway, TranscriptGateway},
    progress::{EventSubType, ProgressEmitter, ProgressEvent, ProgressListener},
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Settings applied to every run started by an [`ExecutionEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Per-request limit at the gateway boundary
    pub timeout: Option<Duration>,

    /// Directory receiving request/response transcripts
    pub transcripts: Option<PathBuf>,

    /// Generation parameters handed to the executor
    pub executor: ExecutorOptions,
}

#[derive(Debug)]
struct ActiveRun {
    transformer: String,
    handle: RunHandle,
}

/// Clears the active-run slot when the run ends, however it ends.
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveRun>>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Entry point for running transformers.
///
/// Validates a transformer before anything runs, wires the gateway with the
/// configured timeout and transcript recording, mirrors progress into the
/// log, and allows at most one active run: a second [`execute`](Self::execute)
/// while one is running fails with [`Error::RunInProgress`].
pub struct ExecutionEngine {
    gateway: Arc<dyn CompletionGateway>,
    executer: Arc<dyn Executer>,
    emitter: ProgressEmitter,
    options: EngineOptions,
    active: Mutex<Option<ActiveRun>>,
}

impl ExecutionEngine {
    /// Creates an engine sending requests through `gateway`.
    pub fn new(gateway: impl CompletionGateway + 'static) -> Self {
        let mut emitter = ProgressEmitter::new();
        emitter.subscribe(log_event);

        Self {
            gateway: Arc::new(gateway),
            executer: Arc::new(DefaultExecuter),
            emitter,
            options: EngineOptions::default(),
            active: Mutex::new(None),
        }
    }

    /// Sets the run options.
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the per-file hooks used by every run.
    #[must_use]
    pub fn with_executer(mut self, executer: impl Executer + 'static) -> Self {
        self.executer = Arc::new(executer);
        self
    }

    /// Registers a progress listener for all subsequent runs.
    pub fn on_progress(&mut self, listener: impl ProgressListener + 'static) {
        self.emitter.subscribe(listener);
    }

    /// Returns true while a run is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    /// Cancels the active run, if any. Returns whether a run was cancelled.
    ///
    /// The run stops before its next file; the file in progress finishes.
    pub fn stop(&self) -> bool {
        match self.slot().as_ref() {
            Some(run) => {
                info!("Stopping transformer '{}'", run.transformer);
                run.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Checks a transformer and the paths it refers to without running it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error starting with `Validation failed:` and
    /// naming the first problem.
    pub fn validate(config: &TransformerConfig) -> Result<()> {
        config
            .validate()
            .and_then(|()| BatchExecutor::validate(config))
            .map_err(|e| {
                let cause = match e {
                    Error::Configuration { message } => message,
                    other => other.to_string(),
                };
                Error::config(format!("Validation failed: {cause}"))
            })
    }

    /// Runs a transformer over its content input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunInProgress`] if another run is active, a
    /// configuration error if validation fails, or any error that aborts the
    /// run as a whole. Failed files are reported in the summary.
    #[instrument(skip_all, fields(transformer = %config.name))]
    pub async fn execute(&self, config: &TransformerConfig) -> Result<RunSummary> {
        Self::validate(config)?;

        let executor = BatchExecutor::from_shared(self.gateway_for(config))
            .with_shared_executer(Arc::clone(&self.executer))
            .with_emitter(self.emitter.clone())
            .with_options(self.options.executor.clone());

        let _guard = self.claim(config, executor.handle())?;

        let summary = executor.execute(config).await?;
        if summary.outputs.is_empty() {
            warn!("No output files were created by '{}'", config.name);
        }
        Ok(summary)
    }

    fn claim(&self, config: &TransformerConfig, handle: RunHandle) -> Result<ActiveGuard<'_>> {
        let mut slot = self.slot();
        if let Some(run) = slot.as_ref() {
            return Err(Error::RunInProgress {
                transformer: run.transformer.clone(),
            });
        }

        *slot = Some(ActiveRun {
            transformer: config.name.clone(),
            handle,
        });
        Ok(ActiveGuard { slot: &self.active })
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gateway_for(&self, config: &TransformerConfig) -> Arc<dyn CompletionGateway> {
        let mut gateway = Arc::clone(&self.gateway);

        if let Some(after) = self.options.timeout {
            debug!("Limiting requests to {:?}", after);
            gateway = Arc::new(TimeoutGateway::new(gateway, after));
        }

        if let Some(dir) = &self.options.transcripts {
            debug!("Recording transcripts in {}", dir.display());
            gateway = Arc::new(TranscriptGateway::new(gateway, dir, config.name.as_str()));
        }

        gateway
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("gateway", &self.gateway.name())
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn log_event(event: &ProgressEvent) {
    let message = event.message.as_deref().unwrap_or_default();
    match event.sub_type {
        EventSubType::CurrentInput | EventSubType::OutputCreated => info!("{}", message),
        EventSubType::Progress => debug!("{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputBinding;
    use crate::executor::RunOutcome;
    use crate::gateway::{CompletionOptions, FnGateway, Prompt};
    use assert_fs::prelude::*;
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::sync::Notify;

    fn config(input: &Path, output: &Path) -> TransformerConfig {
        TransformerConfig::builder()
            .id("t")
            .name("Echo")
            .description("echo")
            .prompt("{{content}}")
            .input(InputBinding::content(input))
            .output_folder(output)
            .build()
            .unwrap()
    }

    fn fixed(reply: &'static str) -> FnGateway<impl Fn(&Prompt, &CompletionOptions) -> Result<String> + Send + Sync> {
        FnGateway::new(move |_: &Prompt, _: &CompletionOptions| Ok(reply.to_string()))
    }

    /// Blocks every request until released.
    struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl CompletionGateway for Gate {
        async fn send_completion(&self, _: &Prompt, _: &CompletionOptions) -> Result<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_validation_failure_is_wrapped() {
        let temp = assert_fs::TempDir::new().unwrap();
        let engine = ExecutionEngine::new(fixed("x"));

        let err = engine
            .execute(&config(&temp.path().join("missing"), temp.path()))
            .await
            .unwrap_err();

        assert!(err.is_config());
        assert!(err.to_string().contains("Validation failed:"));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_run_writes_outputs_and_releases_slot() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let engine = ExecutionEngine::new(fixed("result"));
        let summary = engine
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(summary.outcome(), RunOutcome::Completed);
        temp.child("out/a.txt").assert("result");
        assert!(!engine.is_running());
        assert!(!engine.stop());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_and_stop_cancels() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();
        temp.child("in/b.txt").write_str("b").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let engine = Arc::new(ExecutionEngine::new(Gate {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }));
        let config = config(&temp.path().join("in"), &temp.path().join("out"));

        let run = {
            let engine = Arc::clone(&engine);
            let config = config.clone();
            tokio::spawn(async move { engine.execute(&config).await })
        };

        entered.notified().await;
        assert!(engine.is_running());

        let err = engine.execute(&config).await.unwrap_err();
        assert!(matches!(err, Error::RunInProgress { ref transformer } if transformer == "Echo"));

        assert!(engine.stop());
        release.notify_one();

        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.outcome(), RunOutcome::Stopped);
        assert_eq!(summary.outputs.len(), 1);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_timeout_is_a_file_failure() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let engine = ExecutionEngine::new(Gate {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        })
        .with_options(EngineOptions {
            timeout: Some(Duration::from_millis(20)),
            ..EngineOptions::default()
        });

        let summary = engine
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert!(summary.outputs.is_empty());
        assert!(summary.failures[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_transcripts_use_transformer_name() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let engine = ExecutionEngine::new(fixed("ok")).with_options(EngineOptions {
            transcripts: Some(temp.path().join("log")),
            ..EngineOptions::default()
        });
        engine
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        let days: Vec<_> = std::fs::read_dir(temp.path().join("log/Echo")).unwrap().collect();
        assert_eq!(days.len(), 1);
    }

    #[tokio::test]
    async fn test_listeners_see_events() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("in/a.txt").write_str("a").unwrap();
        temp.child("out").create_dir_all().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut engine = ExecutionEngine::new(fixed("ok"));
        engine.on_progress(move |e: &ProgressEvent| sink.lock().unwrap().push(e.sub_type));

        engine
            .execute(&config(&temp.path().join("in"), &temp.path().join("out")))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventSubType::CurrentInput, EventSubType::OutputCreated]
        );
    }
}
