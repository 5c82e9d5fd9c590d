use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use llm_transformer::gateway::CommandGateway;
use llm_transformer::{
    ConfigStore, EngineOptions, ExecutionEngine, ExecutorOptions, TransformerConfig,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const STORE_FILE: &str = "transformers.json";

#[derive(Parser, Debug)]
#[command(
    name = "llm-transformer",
    version,
    author,
    about = "Run prompt-template transformers over files through an LLM",
    long_about = "Manage transformers and run them over files and folders.\n\n\
    A transformer pairs a prompt template containing {{content}} with an input \
    file or folder and an output folder. Every visible file below the input is \
    sent to the LLM command and the response is written to the mirrored path \
    under the output folder.\n\n\
    USAGE EXAMPLES:\n  \
      # Store a transformer defined in JSON\n  \
      llm-transformer create --file summarize.json\n\n  \
      # Run it through a local model\n  \
      llm-transformer run Summarize --command \"ollama run llama3\"\n\n  \
      # Share transformers without local paths\n  \
      llm-transformer export --out shared.json"
)]
struct Cli {
    /// Transformer store file
    #[arg(long, global = true, env = "LLM_TRANSFORMER_STORE", value_name = "PATH")]
    store: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored transformers
    List,

    /// Print one transformer as JSON
    Show {
        /// Transformer id or name
        transformer: String,
    },

    /// Add a transformer from a JSON file
    ///
    /// A missing `id` is generated.
    Create {
        /// JSON file describing the transformer
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Replace a stored transformer with the contents of a JSON file
    Update {
        /// JSON file describing the transformer, including its `id`
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Remove a transformer
    Delete {
        /// Transformer id or name
        transformer: String,
    },

    /// Copy a transformer under a new id
    Duplicate {
        /// Transformer id or name
        transformer: String,
    },

    /// Write transformers to a shareable file with local paths removed
    Export {
        /// Destination file
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,

        /// Ids or names to export (all when omitted)
        transformers: Vec<String>,
    },

    /// Add every transformer found in an exported file
    Import {
        /// File written by `export`
        file: PathBuf,
    },

    /// Check a transformer and its paths without running it
    Validate {
        /// Transformer id or name
        transformer: String,
    },

    /// Run a transformer
    Run {
        /// Transformer id or name
        transformer: String,

        /// Command receiving each prompt on stdin and answering on stdout
        ///
        /// Split on whitespace; quotes are not interpreted.
        #[arg(short, long, env = "LLM_TRANSFORMER_COMMAND", value_name = "CMD")]
        command: String,

        /// Model name exported to the command as LLM_MODEL
        #[arg(short, long)]
        model: Option<String>,

        /// Per-request limit in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Directory receiving request/response transcripts
        #[arg(long, value_name = "DIR")]
        transcripts: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose)?;

    let store_path = match cli.store {
        Some(path) => path,
        None => default_store_path()?,
    };
    let mut store = ConfigStore::open_file(&store_path)
        .with_context(|| format!("Failed to open transformer store {}", store_path.display()))?;

    match cli.command {
        Command::List => {
            if store.is_empty() {
                println!("No transformers stored in {}", store_path.display());
            }
            for config in store.get_all() {
                println!("{:<38} {:<30} {}", config.id, config.name, config.description);
            }
        }
        Command::Show { transformer } => {
            let config = find(&store, &transformer)?;
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        Command::Create { file } => {
            let config = read_config(&file, true)?;
            let name = config.name.clone();
            store.create(config).context("Failed to create transformer")?;
            println!("Created transformer '{name}'");
        }
        Command::Update { file } => {
            let config = read_config(&file, false)?;
            let name = config.name.clone();
            store.update(config).context("Failed to update transformer")?;
            println!("Updated transformer '{name}'");
        }
        Command::Delete { transformer } => {
            let removed = store.delete(&transformer).context("Failed to delete transformer")?;
            println!("Deleted transformer '{}'", removed.name);
        }
        Command::Duplicate { transformer } => {
            let copy = store
                .duplicate(&transformer)
                .context("Failed to duplicate transformer")?;
            println!("Created '{}' ({})", copy.name, copy.id);
        }
        Command::Export { out, transformers } => {
            let keys: Vec<&str> = transformers.iter().map(String::as_str).collect();
            let count = store.export_to(&out, &keys).context("Export failed")?;
            println!("Exported {count} transformer(s) to {}", out.display());
        }
        Command::Import { file } => {
            let report = store.import_from(&file).context("Import failed")?;
            for failure in &report.failures {
                warn!(
                    "Entry {} ({}): {}",
                    failure.index,
                    failure.name.as_deref().unwrap_or("unnamed"),
                    failure.message
                );
            }
            println!("Imported {}/{} transformer(s)", report.succeeded, report.total);
        }
        Command::Validate { transformer } => {
            let config = find(&store, &transformer)?;
            ExecutionEngine::validate(config)?;
            println!("Transformer '{}' is ready to run", config.name);
        }
        Command::Run {
            transformer,
            command,
            model,
            timeout,
            transcripts,
        } => {
            let config = find(&store, &transformer)?.clone();
            let gateway = CommandGateway::from_command_line(&command)?;
            let options = EngineOptions {
                timeout: timeout.map(Duration::from_secs),
                transcripts,
                executor: ExecutorOptions { model, top_p: None },
            };

            run(ExecutionEngine::new(gateway).with_options(options), &config).await?;
        }
    }

    Ok(())
}

async fn run(engine: ExecutionEngine, config: &TransformerConfig) -> anyhow::Result<()> {
    let engine = Arc::new(engine);

    let stopper = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && stopper.stop() {
            info!("Interrupted; finishing the current file");
        }
    });

    let summary = engine
        .execute(config)
        .await
        .with_context(|| format!("Transformer '{}' failed", config.name))?;

    summary.print_summary();
    Ok(())
}

fn find<'a>(store: &'a ConfigStore, key: &str) -> anyhow::Result<&'a TransformerConfig> {
    store
        .get(key)
        .with_context(|| format!("Transformer '{key}' not found"))
}

fn read_config(path: &Path, generate_id: bool) -> anyhow::Result<TransformerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    if generate_id {
        match &mut value {
            Value::Object(fields) => {
                fields
                    .entry("id")
                    .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
            }
            _ => bail!("{} must contain a JSON object", path.display()),
        }
    }

    serde_json::from_value(value)
        .with_context(|| format!("{} does not describe a transformer", path.display()))
}

fn default_store_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine the user configuration directory")?;
    Ok(dir.join("llm-transformer").join(STORE_FILE))
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("llm_transformer=info"),
        1 => EnvFilter::new("llm_transformer=debug"),
        _ => EnvFilter::new("llm_transformer=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .init();

    Ok(())
}
