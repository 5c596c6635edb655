mod config;

use cadence_gateway::GatewayServer;
use cadence_orchestrator::{
    ExecutorRegistry, HtnPlanner, InMemoryAgentStore, InMemoryEpisodicMemory, InMemoryRetrieval,
    InMemoryTaskStore, OpenAiCompatClient, Orchestrator, QueryRequest, ThompsonRouter,
};
use cadence_security::{
    InMemoryCounterStore, RateLimitCounterStore, RateLimiter, SqliteCounterStore,
};
use clap::{Parser, Subcommand, ValueEnum};
use config::{load_config, CadenceConfig, StoreKind, DEFAULT_CONFIG_PATH};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence", about = "Cadence: adaptive multi-agent task scheduler")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one query and print the result as JSON
    Run {
        query: String,
        #[arg(long)]
        task_type: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
        /// Print each orchestration event as a JSON line
        #[arg(long)]
        stream: bool,
    },
    /// List registered decomposition methods
    Methods,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn build_planner(config: &CadenceConfig) -> HtnPlanner {
    let mut planner = HtnPlanner::with_default_methods();
    for entry in &config.methods {
        planner.register_method(entry.task_type.clone(), entry.to_method());
    }
    planner
}

async fn build_orchestrator(config: &CadenceConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let llm = Arc::new(OpenAiCompatClient::new(config.llm.clone()));
    let agents = Arc::new(InMemoryAgentStore::with_agents(config.agent_catalog()));

    let orchestrator = Orchestrator::new(
        Arc::new(build_planner(config)),
        Arc::new(ThompsonRouter::new(config.router.clone())),
        Arc::new(ExecutorRegistry::with_llm(llm)),
        Arc::new(InMemoryTaskStore::new()),
        agents,
    )
    .with_retrieval(Arc::new(InMemoryRetrieval::new()))
    .with_memory(Arc::new(InMemoryEpisodicMemory::new()))
    .with_config(config.orchestrator.clone());

    let registered = orchestrator.sync_agents().await?;
    info!(
        agents = registered,
        methods = orchestrator.planner().method_count(),
        model = %config.llm.model,
        "Orchestrator ready"
    );
    Ok(Arc::new(orchestrator))
}

async fn build_limiter(config: &CadenceConfig) -> anyhow::Result<Arc<RateLimiter>> {
    let store: Arc<dyn RateLimitCounterStore> = match config.rate_limit_store.kind {
        StoreKind::Memory => Arc::new(InMemoryCounterStore::new()),
        StoreKind::Sqlite => {
            info!(path = %config.rate_limit_store.path.display(), "Using SQLite rate-limit store");
            Arc::new(SqliteCounterStore::open(&config.rate_limit_store.path).await?)
        }
    };
    Ok(Arc::new(
        RateLimiter::new(store).with_policies(config.rate_limits.clone()),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let explicit = cli.config.is_some();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_config(&config_path, explicit).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let orchestrator = build_orchestrator(&config).await?;
            let limiter = build_limiter(&config).await?;
            let app = GatewayServer::build(orchestrator, limiter);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Cadence gateway listening on {}", addr);
            axum::serve(listener, app).await?;
        }
        Commands::Run {
            query,
            task_type,
            session_id,
            stream,
        } => {
            let orchestrator = build_orchestrator(&config).await?;
            let mut request = QueryRequest::new(query);
            request.task_type = task_type;
            request.session_id = session_id;

            if stream {
                let mut events = orchestrator.process_query_stream(request);
                while let Some(event) = events.next().await {
                    println!("{}", serde_json::to_string(&event)?);
                }
            } else {
                let result = orchestrator.process_query(request).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Commands::Methods => {
            let planner = build_planner(&config);
            let methods = planner.methods();
            if methods.is_empty() {
                println!("No decomposition methods registered.");
            } else {
                println!("Registered methods:");
                for (task_type, method) in &methods {
                    println!("  {task_type}: {}", method.name);
                    if !method.preconditions.is_empty() {
                        println!("    Preconditions: {:?}", method.preconditions);
                    }
                    for (index, subtask) in method.subtasks.iter().enumerate() {
                        let agent = subtask
                            .agent_type
                            .map_or_else(|| "any".to_string(), |t| t.to_string());
                        println!(
                            "    {}. [{agent}, {}] {}",
                            index + 1,
                            subtask.priority,
                            subtask.description
                        );
                    }
                }
                println!("\nTotal: {} method(s)", methods.len());
            }
        }
    }

    Ok(())
}
