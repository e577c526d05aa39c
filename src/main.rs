use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rudder::api::ApiVersion;
use rudder::config::RudderConfig;
use rudder::deploy::{ClientRegistry, DeploymentProcessor, FakeCloudClient};
use rudder::model::{CallerIdentity, ResourceEnvelope, ResourceId};
use rudder::operations::{StatusManager, Worker};
use rudder::pipeline::{DeleteOutcome, Precondition, RequestContext, ResourceController, UpsertOutcome};
use rudder::queue::memory::InMemoryQueue;
use rudder::render::{OutputResourceType, RendererRegistry};
use rudder::store::sqlite::SqliteStorage;
use rudder::store::{ETag, StorageClient};
use rudder::validate::RuleValidator;

/// rudder - resource-provider control plane
#[derive(Parser)]
#[command(name = "rudder", version, about, long_about = None)]
struct Cli {
    /// Path to a rudder config file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Working directory for rudder state
    #[arg(short, long, default_value = ".rudder")]
    working_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update a resource from a document file
    Apply {
        /// Full resource id, e.g. /planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/caches/cache0
        #[arg(long)]
        id: String,

        /// Resource document (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,

        /// API version of the document
        #[arg(long, default_value = "2024-06-01")]
        api_version: String,

        /// Require the resource to be at this revision ('*' for any)
        #[arg(long)]
        if_match: Option<String>,

        /// Require the resource to not exist yet
        #[arg(long)]
        if_none_match: bool,

        /// Do not wait for an accepted operation to finish
        #[arg(long)]
        no_wait: bool,
    },

    /// Read a resource
    Get {
        #[arg(long)]
        id: String,

        #[arg(long, default_value = "2024-06-01")]
        api_version: String,
    },

    /// Delete a resource
    Delete {
        #[arg(long)]
        id: String,

        #[arg(long, default_value = "2024-06-01")]
        api_version: String,

        #[arg(long)]
        if_match: Option<String>,

        #[arg(long)]
        no_wait: bool,
    },

    /// List resources in the state store
    Resources,

    /// Manage async operations
    Operations {
        #[command(subcommand)]
        command: OperationCommands,
    },

    /// Run the async worker loop
    Worker,
}

#[derive(Subcommand)]
enum OperationCommands {
    /// List operation records
    List,

    /// Show one operation
    Show { id: String },

    /// Request cancellation of a running operation
    Cancel { id: String },
}

/// Everything a single-process plane needs, wired against the sqlite
/// store, the in-process queue, and the fake provider clients.
struct Plane {
    store: Arc<dyn StorageClient>,
    controller: ResourceController,
    worker: Arc<Worker>,
}

fn build_plane(config: &RudderConfig, working_dir: &str) -> Result<Plane> {
    let db_path = Path::new(working_dir)
        .join(&config.store.db_path)
        .to_string_lossy()
        .into_owned();
    let store: Arc<dyn StorageClient> = Arc::new(SqliteStorage::open(&db_path)?);
    let queue = Arc::new(InMemoryQueue::new(config.worker.lease()));
    let status = Arc::new(StatusManager::new(
        Arc::clone(&store),
        queue.clone(),
        config.worker.cas_retry_limit,
    ));
    let registry = Arc::new(RendererRegistry::builtin());

    let mut clients = ClientRegistry::new();
    let azure = Arc::new(FakeCloudClient::new("azure"));
    clients.register(
        OutputResourceType::new("azure", "azure.sql/servers"),
        azure.clone(),
    );
    clients.register(
        OutputResourceType::new("azure", "azure.sql/databases"),
        azure.clone(),
    );
    clients.register(
        OutputResourceType::new("azure", "azure.app/bindings"),
        azure,
    );
    clients.register(
        OutputResourceType::new("azure", "azure.cache/redis"),
        Arc::new(
            FakeCloudClient::new("azure").with_live_defaults(serde_json::json!({
                "primaryConnectionString": "redis://localhost:6379",
            })),
        ),
    );
    let deployer = Arc::new(DeploymentProcessor::new(clients));

    let controller = ResourceController::new(
        Arc::clone(&store),
        status.clone(),
        registry.clone(),
        deployer.clone(),
        Arc::new(RuleValidator::builtin()),
        config.pipeline.clone(),
    );
    let worker = Arc::new(Worker::new(
        Arc::clone(&store),
        queue,
        status,
        registry,
        deployer,
        config.worker.clone(),
    ));

    Ok(Plane {
        store,
        controller,
        worker,
    })
}

fn caller() -> CallerIdentity {
    let principal = std::env::var("USER").unwrap_or_else(|_| "rudder-cli".to_string());
    CallerIdentity::new(principal)
}

fn request_context(
    id: &str,
    api_version: &str,
    if_match: Option<&str>,
    if_none_match: bool,
) -> Result<RequestContext> {
    let resource_id = ResourceId::parse(id)?;
    let api_version: ApiVersion = api_version.parse()?;
    let precondition = match (if_match, if_none_match) {
        (Some(_), true) => bail!("--if-match and --if-none-match are mutually exclusive"),
        (Some("*"), false) => Precondition::IfMatchAny,
        (Some(etag), false) => Precondition::IfMatch(ETag::from(etag)),
        (None, true) => Precondition::IfNoneMatchAny,
        (None, false) => Precondition::None,
    };
    Ok(RequestContext::new(resource_id, api_version, caller()).with_precondition(precondition))
}

fn read_document(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading resource document {}", path.display()))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing json document {}", path.display()))
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing yaml document {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RudderConfig::load(cli.config.as_deref())?;
    let plane = build_plane(&config, &cli.working_dir)?;

    match cli.command {
        Commands::Apply {
            id,
            file,
            api_version,
            if_match,
            if_none_match,
            no_wait,
        } => {
            let ctx = request_context(&id, &api_version, if_match.as_deref(), if_none_match)?;
            let body = read_document(&file)?;
            match plane.controller.upsert(&ctx, &body).await? {
                UpsertOutcome::Completed { body, etag } => {
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    println!("etag: {etag}");
                }
                UpsertOutcome::Accepted { operation } => {
                    println!("accepted: operation {}", operation.id);
                    if !no_wait {
                        plane.worker.drain().await;
                        let finished = plane.controller.operation_status(operation.id).await?;
                        println!("operation {}: {}", finished.id, finished.status);
                        if let Some(error) = finished.error {
                            println!("  {}: {}", error.code, error.message);
                        }
                    }
                }
            }
        }

        Commands::Get { id, api_version } => {
            let ctx = request_context(&id, &api_version, None, false)?;
            let (body, etag) = plane.controller.get(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            println!("etag: {etag}");
        }

        Commands::Delete {
            id,
            api_version,
            if_match,
            no_wait,
        } => {
            let ctx = request_context(&id, &api_version, if_match.as_deref(), false)?;
            match plane.controller.delete(&ctx).await? {
                DeleteOutcome::Deleted => println!("deleted"),
                DeleteOutcome::AlreadyGone => println!("already gone"),
                DeleteOutcome::Accepted { operation } => {
                    println!("accepted: operation {}", operation.id);
                    if !no_wait {
                        plane.worker.drain().await;
                        let finished = plane.controller.operation_status(operation.id).await?;
                        println!("operation {}: {}", finished.id, finished.status);
                    }
                }
            }
        }

        Commands::Resources => {
            let objects = plane.store.list_prefix("/planes/").await?;
            if objects.is_empty() {
                println!("No resources in state.");
            }
            for obj in objects {
                let envelope: ResourceEnvelope = obj.decode()?;
                println!(
                    "{}  {}  {}",
                    envelope.id, envelope.resource_type, envelope.provisioning_state
                );
            }
        }

        Commands::Operations { command } => match command {
            OperationCommands::List => {
                let objects = plane.store.list_prefix("operations/").await?;
                for obj in objects {
                    // Skip single-flight index entries.
                    if obj.id.starts_with("operations/index") {
                        continue;
                    }
                    let op: rudder::operations::AsyncOperation = obj.decode()?;
                    println!("{}  {}  {}  {}", op.id, op.kind, op.status, op.resource_id);
                }
            }
            OperationCommands::Show { id } => {
                let id = Uuid::parse_str(&id).context("operation id must be a uuid")?;
                let op = plane.controller.operation_status(id).await?;
                println!("{}", serde_json::to_string_pretty(&op)?);
            }
            OperationCommands::Cancel { id } => {
                let id = Uuid::parse_str(&id).context("operation id must be a uuid")?;
                let op = plane.controller.cancel_operation(id).await?;
                println!("cancellation requested for operation {}", op.id);
            }
        },

        Commands::Worker => {
            let worker = Arc::clone(&plane.worker);
            tokio::select! {
                _ = worker.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    println!("shutting down");
                    // Give in-flight messages a moment to finish their
                    // terminal writes before the process exits.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }

    Ok(())
}
