//! # llm-transformer
//!
//! Run prompt-template "transformers" over files and folders through an LLM.
//!
//! A transformer is a stored configuration: a prompt template containing
//! `{{content}}`, a set of named inputs, and an output folder. Running it walks
//! the `content` input, sends one prompt per file (or one prompt for all files
//! joined) to a completion gateway, and writes every response to the mirrored
//! location under the output folder.
//!
//! ## Features
//!
//! - Persistent transformer store with legacy snapshot migration
//! - `{{name}}` placeholders filled from literal text or file contents
//! - Per-file failure isolation and cooperative cancellation
//! - Pluggable gateways with timeout and transcript wrappers
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_transformer::{ExecutionEngine, InputBinding, TransformerConfig};
//! use llm_transformer::gateway::CommandGateway;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = TransformerConfig::builder()
//!     .name("Summarize")
//!     .description("One paragraph per file")
//!     .prompt("Summarize the following text:\n{{content}}")
//!     .input(InputBinding::content("./docs"))
//!     .output_folder("./summaries")
//!     .output_file_name("*_summary.md")
//!     .build()?;
//!
//! let engine = ExecutionEngine::new(CommandGateway::from_command_line("my-llm --stdin")?);
//! let summary = engine.execute(&config).await?;
//! summary.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **Store**: persists transformer configurations
//! 2. **Walker**: discovers visible files below the content input
//! 3. **Placeholder**: expands the prompt template for each file
//! 4. **Gateway**: turns a prompt into a completion
//! 5. **Executor**: runs the batch and writes outputs

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod engine;
mod error;
mod executer;
mod executor;
mod naming;
mod placeholder;
mod progress;
mod store;
mod walker;
mod writer;

pub mod gateway;

pub use config::{
    CONTENT_BINDING, EXPORT_PATH_PLACEHOLDER, InputBinding, ProcessFormat, TransformerConfig,
    TransformerConfigBuilder,
};
pub use engine::{EngineOptions, ExecutionEngine};
pub use error::{Error, Result};
pub use executer::{DefaultExecuter, Executer};
pub use executor::{
    BatchExecutor, ExecutorOptions, FileError, FileStage, JOIN_SEPARATOR, RunHandle, RunOutcome,
    RunSummary,
};
pub use naming::{DEFAULT_OUTPUT_EXTENSION, mirrored_path, output_name, output_path};
pub use placeholder::{
    CONTENT_TOKEN, PLACEHOLDER_PATTERN, output_instruction, placeholder_names, resolve,
};
pub use progress::{EventSubType, EventType, ProgressEmitter, ProgressEvent, ProgressListener};
pub use store::{
    ConfigStore, ImportFailure, ImportReport, JsonFileStorage, MemoryStorage, SnapshotStorage,
    legacy_id, parse_snapshot,
};
pub use walker::{TreeWalker, Walk, WalkEntry};

/// Runs one transformer with the default hooks and options.
///
/// # Errors
///
/// Returns an error if the transformer fails validation or the run cannot
/// start. Failed files are reported in the returned summary.
///
/// # Examples
///
/// ```no_run
/// use llm_transformer::{TransformerConfig, run};
/// use llm_transformer::gateway::CommandGateway;
///
/// # async fn example(config: TransformerConfig) -> anyhow::Result<()> {
/// let summary = run(CommandGateway::new("my-llm"), &config).await?;
/// println!("{} file(s) written", summary.outputs.len());
/// # Ok(())
/// # }
/// ```
pub async fn run(
    gateway: impl gateway::CompletionGateway + 'static,
    config: &TransformerConfig,
) -> Result<RunSummary> {
    ExecutionEngine::new(gateway).execute(config).await
}
