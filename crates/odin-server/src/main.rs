//! odind: websocket server that runs forever and serves pipelines.

mod cleanup;
mod context;
mod protocol;
mod status;
mod ws;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::routing::any;
use clap::Parser;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use odin_k8s::KubernetesTaskManager;
use odin_store::{
    Cache, MongoCache, MongoStore, PgCache, PgStore, Store, create_pool, run_migrations,
};

use crate::context::ServerContext;
use crate::ws::ws_handler;

#[derive(Parser)]
#[command(name = "odind", about = "Websocket-based pipeline scheduler")]
struct Args {
    /// Directory holding the pipeline definitions.
    #[arg(long)]
    root_path: PathBuf,

    /// Directory where pipeline runs write their data; defaults to the root.
    #[arg(long)]
    data_path: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 30000)]
    port: u16,

    /// Credential file with a `jobs_db` section; falls back to environment.
    #[arg(long)]
    cred: Option<PathBuf>,

    /// Kubernetes namespace tasks are scheduled into.
    #[arg(long, default_value = "default", env = "ODIN_NAMESPACE")]
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct CredFile {
    jobs_db: DbSettings,
}

#[derive(Debug, Deserialize)]
struct DbSettings {
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default = "default_db_host")]
    host: String,
    #[serde(default = "default_db_port")]
    port: u16,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    passwd: Option<String>,
    #[serde(default = "default_db_name")]
    db: String,
}

fn default_backend() -> String {
    "postgres".to_string()
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "jobs_db".to_string()
}

impl DbSettings {
    fn from_env() -> Self {
        Self {
            backend: std::env::var("ODIN_JOBS_BACKEND").unwrap_or_else(|_| default_backend()),
            host: std::env::var("SQL_HOST").unwrap_or_else(|_| default_db_host()),
            port: std::env::var("DB_PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or_else(default_db_port),
            user: std::env::var("DB_USER").ok(),
            passwd: std::env::var("DB_PASS").ok(),
            db: std::env::var("DB_NAME").unwrap_or_else(|_| default_db_name()),
        }
    }

    fn url(&self, scheme: &str) -> String {
        let auth = match (&self.user, &self.passwd) {
            (Some(user), Some(passwd)) => format!("{user}:{passwd}@"),
            (Some(user), None) => format!("{user}@"),
            _ => String::new(),
        };
        format!("{scheme}://{auth}{}:{}/{}", self.host, self.port, self.db)
    }
}

fn db_settings(cred: Option<&Path>) -> anyhow::Result<DbSettings> {
    match cred {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            let cred: CredFile = serde_yaml::from_str(&contents)?;
            Ok(cred.jobs_db)
        }
        None => Ok(DbSettings::from_env()),
    }
}

async fn open_backends(
    settings: &DbSettings,
) -> anyhow::Result<(Arc<dyn Store>, Arc<dyn Cache>)> {
    match settings.backend.as_str() {
        "postgres" => {
            let pool = create_pool(&settings.url("postgres")).await?;
            run_migrations(&pool).await?;
            Ok((
                Arc::new(PgStore::new(pool.clone())),
                Arc::new(PgCache::new(pool)),
            ))
        }
        "mongo" => {
            let uri = settings.url("mongodb");
            Ok((
                Arc::new(MongoStore::connect(&uri, &settings.db).await?),
                Arc::new(MongoCache::connect(&uri, &settings.db).await?),
            ))
        }
        other => anyhow::bail!("unknown jobs db backend `{other}`"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = db_settings(args.cred.as_deref())?;
    info!(backend = %settings.backend, "connecting to the jobs db");
    let (store, cache) = open_backends(&settings).await?;

    let manager = Arc::new(KubernetesTaskManager::new(store.clone(), &args.namespace).await?);

    let root_path = args.root_path.canonicalize()?;
    let data_path = match args.data_path {
        Some(path) => path.canonicalize()?,
        None => root_path.clone(),
    };

    let ctx = Arc::new(ServerContext {
        store,
        cache,
        manager,
        root_path,
        data_path,
        generator: None,
    });

    let app = Router::new()
        .route("/", any(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Ready to serve on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
