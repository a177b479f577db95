///
/// This module implements the CLI interface for task-intake: command parsing,
/// wiring of the HTTP collaborators into the core pipeline, and user-visible output.
///
/// All submission logic (sources, share tree, bucket browsing, materialization,
/// phase machine) lives in [`task-intake-core`]. This module is CLI glue only.
///
/// ## Commands
/// - `submit --config <file>`: create one task from the configured source
/// - `browse-share --config <file> [--path <dir>]`: print the share tree, expanding `--path`
/// - `list-bucket --config <file>`: print the cloud bucket listing as a tree
///
/// For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`task-intake-core`]: ../../task-intake-core/
use crate::backend::BackendClient;
use crate::create::HttpTaskCreator;
use crate::load_config::{load_config, CliConfig, SourceSection};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use task_intake_core::bucket::{build_tree, BucketTreeNode, CloudBucketBrowser};
use task_intake_core::fetch::HttpObjectFetcher;
use task_intake_core::forms::{PresetAdvancedForm, PresetBasicForm};
use task_intake_core::materialize::MaterializationPipeline;
use task_intake_core::share_tree::{ShareTreeLoader, ShareTreeNode, SHARE_ROOT};
use task_intake_core::sources::{parse_remote_list, LocalFile, SourceEntries, SourceKind};
use task_intake_core::submission::{SubmissionOrchestrator, SubmissionReport};

/// CLI for task-intake: gather files from one source and create an annotation task.
#[derive(Parser)]
#[clap(
    name = "task-intake",
    version,
    about = "Create tasks from local, share, remote or cloud-bucket files"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create one task from the source described in the config file
    Submit {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Print the server share tree
    BrowseShare {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Directory to expand, e.g. `/images/2024`
        #[clap(long)]
        path: Option<String>,
    },
    /// Print the cloud bucket contents
    ListBucket {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Submit { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "submit", "Starting task submission");
            let report = submit(config).await?;
            print_report(&report);
            Ok(())
        }
        Commands::BrowseShare { config, path } => {
            let config = load_config(config)?;
            tracing::info!(command = "browse-share", ?path, "Browsing share");
            browse_share(&config, path.as_deref()).await
        }
        Commands::ListBucket { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "list-bucket", "Listing bucket");
            list_bucket(&config).await
        }
    }
}

fn backend_client(config: &CliConfig) -> Result<BackendClient> {
    BackendClient::new(
        config.backend.base_url.clone(),
        config.backend.token.clone(),
        &config.settings,
    )
    .map_err(|e| anyhow::anyhow!("Failed to construct backend client: {e}"))
}

fn bucket_browser(backend: &Arc<BackendClient>, config: &CliConfig) -> Arc<CloudBucketBrowser> {
    Arc::new(CloudBucketBrowser::new(
        backend.clone(),
        backend.clone(),
        config.settings.request_timeout(),
    ))
}

/// Wires the HTTP collaborators into an orchestrator and runs one attempt.
pub async fn submit(config: CliConfig) -> Result<SubmissionReport> {
    config.settings.trace_loaded();
    let source = config
        .source
        .clone()
        .ok_or_else(|| anyhow::anyhow!("The config file has no `source` section"))?;

    let backend = Arc::new(backend_client(&config)?);
    let (creator, status) = HttpTaskCreator::new(backend.as_ref().clone());
    let creator = creator.with_deadline(config.settings.creation_timeout());

    let mut builder = SubmissionOrchestrator::builder(
        Arc::new(PresetBasicForm::new(config.task.basic.clone())),
        Arc::new(creator),
        status,
    )
    .creation_timeout(config.settings.creation_timeout());
    if let Some(advanced) = &config.task.advanced {
        builder = builder.advanced(Arc::new(PresetAdvancedForm::new(advanced.clone())));
    }

    let bucket = if source.kind() == SourceKind::Cloud {
        let fetcher = HttpObjectFetcher::new(&config.settings)
            .map_err(|e| anyhow::anyhow!("Failed to construct object fetcher: {e}"))?;
        let bucket = bucket_browser(&backend, &config);
        let pipeline = MaterializationPipeline::new(Arc::new(fetcher), &config.settings);
        builder = builder.cloud(bucket.clone(), pipeline);
        Some(bucket)
    } else {
        None
    };

    let orchestrator = builder.build();
    orchestrator.set_labels(config.task.labels.clone());
    orchestrator.set_active_source(source.kind());

    match source {
        SourceSection::Local { paths } => {
            let files = paths.into_iter().map(LocalFile::new).collect();
            orchestrator.replace_source(SourceEntries::Local(files));
        }
        SourceSection::Share { paths } => {
            orchestrator.replace_source(SourceEntries::Share(paths));
        }
        SourceSection::Remote { urls } => {
            let urls = parse_remote_list(&urls.join("\n"))?;
            orchestrator.replace_source(SourceEntries::Remote(urls));
        }
        SourceSection::Cloud { keys } => {
            if let Some(bucket) = &bucket {
                bucket.list_objects().await;
            }
            let requested = keys.len();
            let accepted = orchestrator.select_cloud_objects(keys)?;
            if accepted < requested {
                tracing::warn!(
                    requested,
                    accepted,
                    "Some configured keys are not present in the bucket listing"
                );
            }
        }
    }

    let report = orchestrator.submit().await?;
    tracing::info!(task_id = ?report.task_id, attempt_id = %report.attempt_id, "Submission complete");
    Ok(report)
}

fn print_report(report: &SubmissionReport) {
    match report.task_id {
        Some(id) => println!("Created task {id} from {} file(s)", report.file_count),
        None => println!("Created task from {} file(s)", report.file_count),
    }
    for failure in &report.materialization_failures {
        println!("  skipped {}: {}", failure.key, failure.error);
    }
}

async fn browse_share(config: &CliConfig, path: Option<&str>) -> Result<()> {
    let backend = Arc::new(backend_client(config)?);
    let loader = ShareTreeLoader::new(backend);
    loader.expand(SHARE_ROOT).await?;

    if let Some(path) = path {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            loader.expand(&prefix).await?;
        }
    }

    print_share_node(&loader.tree(), 0);
    Ok(())
}

fn print_share_node(node: &ShareTreeNode, depth: usize) {
    let marker = if node.is_leaf { "" } else { "/" };
    let name = node.key.rsplit('/').next().unwrap_or(&node.key);
    if depth == 0 {
        println!("{}", node.key);
    } else {
        println!("{}{name}{marker}", "  ".repeat(depth));
    }
    for child in node.children.iter().flatten() {
        print_share_node(child, depth + 1);
    }
}

async fn list_bucket(config: &CliConfig) -> Result<()> {
    let backend = Arc::new(backend_client(config)?);
    let bucket = bucket_browser(&backend, config);
    let listing = bucket.list_objects().await;
    if listing.is_empty() {
        println!("(bucket is empty or could not be listed)");
        return Ok(());
    }
    for node in build_tree(&listing) {
        print_bucket_node(&node, 0);
    }
    Ok(())
}

fn print_bucket_node(node: &BucketTreeNode, depth: usize) {
    let marker = if node.is_directory { "/" } else { "" };
    println!("{}{}{marker}", "  ".repeat(depth), node.title);
    for child in &node.children {
        print_bucket_node(child, depth + 1);
    }
}
