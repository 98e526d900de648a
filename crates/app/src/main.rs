mod chat;

use anyhow::{bail, Context};
use chrono::Utc;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use pocket_rag_core::{
    clean_and_parse_json, discover_documents, get_relevant_text, read_upload, Backend,
    BackendKind, CharacterNgramEmbedder, GenerationParams, InferenceError, MemoryCollection,
    QdrantStore, RagConfig, RagSession, RetrievalQuery, SyncReport, TextGenerator,
    UploadRegistry, VectorIndex,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_PERSIST_DIR: &str = ".pocket-rag";

#[derive(Parser)]
#[command(name = "pocket-rag", version, about = "Ask a hosted model about your own documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(long, env = "POCKET_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the collection snapshot and the uploaded-files log
    #[arg(long, conflicts_with = "ephemeral")]
    persist_dir: Option<PathBuf>,

    /// Keep the collection in memory only; it is gone when the process exits
    #[arg(long, default_value_t = false)]
    ephemeral: bool,

    /// Hosted model backend
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// RunPod endpoint base URL, e.g. https://api.runpod.ai/v2/<endpoint-id>
    #[arg(long)]
    runpod_endpoint: Option<String>,

    /// Ollama API base URL
    #[arg(long)]
    ollama_url: Option<String>,

    /// Ollama model name
    #[arg(long)]
    ollama_model: Option<String>,

    /// Qdrant base URL; when set, chunks are stored there instead of locally
    #[arg(long)]
    qdrant_url: Option<String>,

    /// Log level used when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Runpod,
    Ollama,
}

#[derive(Subcommand)]
enum Command {
    /// Add text or PDF files (or folders of them) to the collection.
    Ingest {
        /// Files or folders to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Answer a question using the most relevant chunks as context.
    Ask {
        /// The question to answer.
        #[arg(long)]
        question: String,
        /// Number of chunks to retrieve.
        #[arg(long)]
        n_results: Option<usize>,
        /// Drop chunks whose similarity is below this value.
        #[arg(long)]
        similarity_threshold: Option<f32>,
        /// Maximum tokens to generate.
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f32>,
        /// Print the retrieved context before the answer.
        #[arg(long, default_value_t = false)]
        show_context: bool,
    },
    /// Show the chunks closest to a query without calling the model.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of chunks to return.
        #[arg(long, default_value = "3")]
        n_results: usize,
        /// Drop chunks whose similarity is below this value.
        #[arg(long)]
        similarity_threshold: Option<f32>,
    },
    /// Remove a file and all of its chunks from the collection.
    Remove {
        /// File name as it was ingested.
        #[arg(long)]
        file: String,
    },
    /// List ingested files.
    Files {
        /// Also print the first N stored chunks.
        #[arg(long, default_value = "0")]
        preview: usize,
    },
    /// Send a raw prompt to the model.
    Generate {
        /// Prompt text.
        #[arg(long)]
        prompt: String,
        /// Submit as a background job and poll its status (RunPod only).
        #[arg(long, default_value_t = false)]
        detached: bool,
        /// Parse the model output as JSON and pretty-print it.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Interactive session: upload files and ask questions.
    Chat,
}

impl Cli {
    fn apply_overrides(&self, config: &mut RagConfig) {
        if self.ephemeral {
            config.persist_dir = None;
        } else if let Some(dir) = &self.persist_dir {
            config.persist_dir = Some(dir.clone());
        } else if config.persist_dir.is_none() {
            config.persist_dir = Some(PathBuf::from(DEFAULT_PERSIST_DIR));
        }

        if let Some(backend) = self.backend {
            config.backend.kind = match backend {
                BackendArg::Runpod => BackendKind::Runpod,
                BackendArg::Ollama => BackendKind::Ollama,
            };
        }
        if let Some(endpoint) = &self.runpod_endpoint {
            config.backend.runpod.endpoint = Some(endpoint.clone());
        }
        if let Some(url) = &self.ollama_url {
            config.backend.ollama.url = url.clone();
        }
        if let Some(model) = &self.ollama_model {
            config.backend.ollama.model = model.clone();
        }
        if let Some(url) = &self.qdrant_url {
            config.qdrant_url = Some(url.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

/// Filter for the configured level. Anything that is not a plain level name
/// falls back to `warn`.
fn level_filter(level: &str) -> (EnvFilter, bool) {
    match Level::from_str(level.trim()) {
        Ok(level) => (EnvFilter::default().add_directive(level.into()), true),
        Err(_) => (EnvFilter::default().add_directive(Level::WARN.into()), false),
    }
}

fn init_logging(level: &str) {
    let (filter, known_level) = if std::env::var("RUST_LOG").is_ok() {
        (EnvFilter::from_default_env(), true)
    } else {
        level_filter(level)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if !known_level {
        warn!("unknown logging level: {level}; using warn");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = RagConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    init_logging(&config.logging.level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        persist_dir = ?config.persist_dir,
        "pocket-rag boot"
    );

    if let Command::Generate {
        prompt,
        detached,
        json,
    } = &cli.command
    {
        return generate(&config, prompt, *detached, *json).await;
    }

    match config.qdrant_url.clone() {
        Some(url) => {
            let store = QdrantStore::new(url, &config.collection_name, config.embedding_dimensions);
            store.ensure_collection().await?;
            run(cli.command, &config, store).await
        }
        None => {
            let collection = match &config.persist_dir {
                Some(dir) => {
                    MemoryCollection::open(dir, &config.collection_name, config.embedding_dimensions)
                        .with_context(|| format!("opening collection in {}", dir.display()))?
                }
                None => MemoryCollection::ephemeral(&config.collection_name, config.embedding_dimensions),
            };
            run(cli.command, &config, collection).await
        }
    }
}

async fn run<V>(command: Command, config: &RagConfig, index: V) -> anyhow::Result<()>
where
    V: VectorIndex + Send + Sync,
{
    let registry = match config.registry_path() {
        Some(path) => UploadRegistry::open(&path)?,
        None => UploadRegistry::in_memory(),
    };
    let embedder = CharacterNgramEmbedder::new(config.embedding_dimensions);

    match command {
        Command::Ingest { paths } => {
            if config.persist_dir.is_none() && config.qdrant_url.is_none() {
                warn!("collection is ephemeral; ingested chunks are lost when this command exits");
            }

            let mut session =
                RagSession::new(index, NoModel, embedder, registry, config.session_options());
            for path in &paths {
                stage_path(&mut session, path)?;
            }
            let report = session.sync_collection().await;
            print_report(&report);
            println!(
                "{} chunks in collection at {}",
                session.collection_count().await?,
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            question,
            n_results,
            similarity_threshold,
            max_tokens,
            temperature,
            show_context,
        } => {
            let backend = config.build_backend()?;
            let mut session =
                RagSession::new(index, backend, embedder, registry, config.session_options());

            let options = session.options_mut();
            if let Some(n) = n_results {
                options.n_results = n;
            }
            if similarity_threshold.is_some() {
                options.similarity_threshold = similarity_threshold;
            }
            if let Some(tokens) = max_tokens {
                options.generation.max_tokens = tokens;
            }
            if let Some(temperature) = temperature {
                options.generation.temperature = temperature;
            }

            if !knowledge_base_available(&session).await? {
                println!("{NO_KNOWLEDGE_BASE}");
            }
            let answer = session.ask(&question).await?;
            if show_context {
                println!("context:\n{}\n", answer.context.text);
            }
            println!("{}", answer.response.trim());
            let sources = answer.context.sources();
            if !sources.is_empty() {
                println!("sources: {}", sources.join(", "));
            }
        }
        Command::Search {
            query,
            n_results,
            similarity_threshold,
        } => {
            let query = RetrievalQuery {
                text: query,
                n_results,
                similarity_threshold,
            };
            let context = get_relevant_text(&index, &embedder, &query).await?;
            println!("query: {}", query.text);
            if context.is_empty() {
                println!("no matching chunks");
            }
            for hit in context.chunks {
                println!(
                    "[{}] similarity={:.4} chunk={}",
                    hit.chunk.source,
                    hit.similarity(),
                    hit.chunk.chunk_id
                );
                println!("  {}", hit.chunk.text);
            }
        }
        Command::Remove { file } => {
            let mut session =
                RagSession::new(index, NoModel, embedder, registry, config.session_options());
            let removed = session.remove_file(&file).await?;
            println!("removed {removed} chunks from {file}");
        }
        Command::Files { preview } => {
            let session =
                RagSession::new(index, NoModel, embedder, registry, config.session_options());
            if session.files().is_empty() {
                println!("no files ingested");
            }
            for name in session.files() {
                println!("{name}");
            }
            println!("collection count: {}", session.collection_count().await?);

            for (position, chunk) in session.preview(preview).await?.iter().enumerate() {
                println!(
                    "item {}: source={} part={}\n  {}",
                    position + 1,
                    chunk.source,
                    chunk.part,
                    chunk.text
                );
            }
        }
        Command::Chat => {
            let backend = config.build_backend()?;
            let session =
                RagSession::new(index, backend, embedder, registry, config.session_options());
            chat::run(session).await?;
        }
        Command::Generate { .. } => bail!("generate does not use a collection"),
    }

    Ok(())
}

async fn generate(config: &RagConfig, prompt: &str, detached: bool, json: bool) -> anyhow::Result<()> {
    let backend = config.build_backend()?;
    let params = &config.generation;

    let response = match (&backend, detached) {
        (Backend::Runpod(client), true) => {
            let job_id = client.submit(prompt, params).await?;
            println!("job: {job_id}");
            client.wait_for(&job_id).await?
        }
        (_, true) => bail!("--detached is only supported by the runpod backend"),
        (backend, false) => backend.generate(prompt, params).await?,
    };

    if json {
        let value = clean_and_parse_json(&response)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", response.trim());
    }
    Ok(())
}

/// Stages a file, or every supported file under a folder. Returns how many
/// files were newly staged.
pub(crate) fn stage_path<V, G>(session: &mut RagSession<V, G>, path: &Path) -> anyhow::Result<usize>
where
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    let files = if path.is_dir() {
        let found = discover_documents(path);
        if found.is_empty() {
            bail!("no txt or pdf files found in {}", path.display());
        }
        found
    } else {
        vec![path.to_path_buf()]
    };

    let mut staged = 0;
    for file in files {
        let upload = read_upload(&file).with_context(|| format!("reading {}", file.display()))?;
        let name = upload.name.clone();
        match session.stage_upload(upload) {
            Ok(true) => {
                println!("Added new file: {name}");
                staged += 1;
            }
            Ok(false) => println!("Already uploaded: {name}"),
            Err(error) => println!("Skipping {name}: {error}"),
        }
    }
    Ok(staged)
}

pub(crate) const NO_KNOWLEDGE_BASE: &str =
    "No knowledge base available. Generating response based only on the prompt.";

/// Whether the collection holds anything at all, regardless of what a given
/// question retrieves from it.
pub(crate) async fn knowledge_base_available<V, G>(
    session: &RagSession<V, G>,
) -> Result<bool, pocket_rag_core::RagError>
where
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    Ok(session.collection_count().await? > 0)
}

pub(crate) fn print_report(report: &SyncReport) {
    for file in &report.ingested {
        println!("Added {} chunks from {}", file.chunk_count, file.name);
    }
    for file in &report.skipped {
        println!("Error processing {}: {}", file.name, file.reason);
    }
}

/// Generator for commands that never reach the model.
struct NoModel;

#[async_trait]
impl TextGenerator for NoModel {
    fn name(&self) -> &str {
        "none"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        Err(InferenceError::NotConfigured(
            "this command does not talk to a model".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_accepted_in_any_case() {
        assert!(level_filter("debug").1);
        assert!(level_filter(" INFO ").1);
        assert_eq!(
            level_filter("trace").0.max_level_hint(),
            Some(tracing::level_filters::LevelFilter::TRACE)
        );
    }

    #[test]
    fn misspelled_levels_fall_back_to_warn() {
        let (filter, known) = level_filter("verbos");
        assert!(!known);
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing::level_filters::LevelFilter::WARN)
        );
    }
}
