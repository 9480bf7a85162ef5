//! ldap-manager CLI
//!
//! Thin operator front end over [`DirectoryService`]: every subcommand runs
//! one service operation and prints the result as JSON on stdout. Logs go
//! to stderr and to `ldap-manager.log`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use ldap_manager::entry::attributes_from_pairs;
use ldap_manager::{
    ClientSettings, ClusterRegistry, CredentialCache, DirectoryService, EntityType, LdapConnector,
    PageRequest, SearchScope, SecureString,
};

const LOG_FILE: &str = "ldap-manager.log";

/// Browse and edit LDAP clusters
#[derive(Parser)]
#[command(name = "ldap-manager")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Cluster registry (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Credential cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured clusters
    Clusters,

    /// Bind to a cluster and cache the password on first success
    Connect {
        cluster: String,
        /// Bind password; ignored when one is already cached
        #[arg(long, env = "LDAP_MANAGER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Inspect or clear the cached password
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },

    /// Page through a cluster's entries
    Browse {
        cluster: String,
        /// users, groups or ous
        #[arg(long = "type")]
        entity_type: Option<String>,
        /// Free text matched against uid, cn, mail and sn
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = ldap_manager::pagination::DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },

    /// Unpaginated search with an explicit base and filter
    Query {
        cluster: String,
        #[arg(long)]
        base: String,
        #[arg(long, default_value = "(objectClass=*)")]
        filter: String,
        #[arg(long, default_value = "subtree")]
        scope: SearchScope,
        /// Attribute to return (repeatable); all user attributes when omitted
        #[arg(long = "attr")]
        attributes: Vec<String>,
    },

    /// Add an entry
    Create {
        cluster: String,
        dn: String,
        /// name=value (repeat a name for multiple values)
        #[arg(long = "attr", required = true)]
        attributes: Vec<String>,
    },

    /// Replace attributes of an entry
    Update {
        cluster: String,
        dn: String,
        /// name=value (repeat a name for multiple values)
        #[arg(long = "attr", required = true)]
        changes: Vec<String>,
    },

    /// Delete an entry
    Delete { cluster: String, dn: String },

    /// Probe the cluster's primary endpoint
    Health { cluster: String },

    /// Entry count and replication state of every node
    Metrics { cluster: String },

    /// Operation counters from the monitor backend
    Activity { cluster: String },
}

#[derive(Subcommand)]
enum PasswordAction {
    /// Report whether a password is cached
    Check { cluster: String },
    /// Remove the cached password
    Clear { cluster: String },
}

#[derive(Serialize)]
struct CachedStatus {
    cached: bool,
}

#[derive(Serialize)]
struct Status {
    status: &'static str,
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_dir = dirs::data_local_dir()
        .map(|p| p.join("ldap-manager"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the JSON results
    if std::fs::create_dir_all(&log_dir).is_err() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(true))
            .init();
        return None;
    }

    // Non-rolling file appender
    let file_appender = RollingFileAppender::new(Rotation::NEVER, &log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(true))
        .init();

    tracing::debug!("Log file: {}", log_dir.join(LOG_FILE).display());
    Some(guard)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // flushes the file writer on drop
    let _guard = init_logging();

    let mut settings = ClientSettings::from_env();
    if let Some(path) = cli.config {
        settings.config_path = path;
    }
    if let Some(dir) = cli.cache_dir {
        settings.cache_dir = dir;
    }

    let registry = ClusterRegistry::load(&settings.config_path)
        .with_context(|| format!("loading {}", settings.config_path.display()))?;
    let cache = CredentialCache::open(&settings.cache_dir)?;
    let service = DirectoryService::new(registry, cache, LdapConnector::new(settings));

    run(&service, cli.command).await
}

async fn run(service: &DirectoryService<LdapConnector>, command: Commands) -> Result<()> {
    match command {
        Commands::Clusters => print_json(&service.clusters()),
        Commands::Connect { cluster, password } => {
            let response = service.connect(&cluster, password.map(SecureString::new)).await?;
            print_json(&response)
        }
        Commands::Password { action } => match action {
            PasswordAction::Check { cluster } => print_json(&CachedStatus {
                cached: service.password_cached(&cluster),
            }),
            PasswordAction::Clear { cluster } => {
                service.forget_password(&cluster)?;
                print_json(&Status { status: "success" })
            }
        },
        Commands::Browse {
            cluster,
            entity_type,
            search,
            page,
            page_size,
        } => {
            let request = PageRequest::new(page, page_size)?;
            let entity = EntityType::parse(entity_type.as_deref());
            let page = service
                .browse(&cluster, entity, search.as_deref(), request)
                .await?;
            print_json(&page)
        }
        Commands::Query {
            cluster,
            base,
            filter,
            scope,
            attributes,
        } => {
            let results = service
                .query(&cluster, &base, &filter, scope, &attributes)
                .await?;
            print_json(&results)
        }
        Commands::Create {
            cluster,
            dn,
            attributes,
        } => {
            let attributes = attributes_from_pairs(&attributes)?;
            print_json(&service.create_entry(&cluster, &dn, attributes).await?)
        }
        Commands::Update { cluster, dn, changes } => {
            let changes = attributes_from_pairs(&changes)?;
            print_json(&service.update_entry(&cluster, &dn, changes).await?)
        }
        Commands::Delete { cluster, dn } => print_json(&service.delete_entry(&cluster, &dn).await?),
        Commands::Health { cluster } => print_json(&service.health(&cluster).await?),
        Commands::Metrics { cluster } => print_json(&service.node_metrics(&cluster).await?),
        Commands::Activity { cluster } => print_json(&service.activity(&cluster).await?),
    }
}
