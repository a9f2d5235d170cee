//! PosSync CLI
//!
//! Thin wrapper around possync-core for operating a device's local store
//! and triggering sync from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Create the local database and schema
//! possync init
//!
//! # Point the device at a backend
//! possync config set-remote https://backend.example <api_key>
//!
//! # Register (first account becomes admin)
//! possync auth sign-up owner@shop.example secret "Shop Owner"
//!
//! # Work offline
//! possync branch create "Downtown" --address "1 Main St"
//! possync branch list
//!
//! # One cycle, or keep syncing every interval until Ctrl-C
//! possync sync
//! possync sync --watch
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use possync_core::logging::LoggingBuilder;
use tracing::debug;
use possync_core::{
    AccountService, AppConfig, AssignmentRole, AuthBackend, BranchRepo, LocalStore,
    ManualReachability, MemoryRemote, NetworkStatus, ProfileRepo, Reachability, RemoteStore,
    RestRemote, Role, Session, SyncEngine, SyncEvent, SyncOutcome, TcpProbe,
};

const SESSION_FILE: &str = "session.json";

/// PosSync - offline-first point-of-sale sync
#[derive(Parser)]
#[command(name = "possync")]
#[command(version = "0.1.0")]
#[command(about = "PosSync - offline-first point-of-sale sync")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.possync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Also write JSONL logs under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local database and apply the schema
    Init,

    /// Show pending changes and remote configuration
    Status,

    /// Run one sync cycle
    Sync {
        /// Keep syncing every interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Branch management
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Profile management
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Account sign-up, sign-in and sign-out
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Device configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    /// Create a branch
    Create {
        name: String,
        #[arg(long)]
        address: Option<String>,
    },
    /// List branches (soft-deleted ones hidden)
    List,
    /// Show one branch
    Show { id: String },
    /// Rename a branch or change its address
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    /// Soft-delete a branch
    Delete { id: String },
    /// Assign a profile to a branch (replaces an existing assignment)
    Assign {
        branch_id: String,
        user_id: String,
        /// manager or user
        #[arg(long, default_value = "user")]
        role: String,
    },
    /// List a branch's assignments
    Assignments { branch_id: String },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List profiles
    List {
        /// Only profiles with this role
        #[arg(long)]
        role: Option<String>,
    },
    /// Show one profile
    Show { id: String },
    /// Change a profile's display name
    Rename { id: String, name: String },
    /// Change a profile's role (actor must be admin)
    SetRole {
        actor: String,
        target: String,
        role: String,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Register a new account
    SignUp {
        email: String,
        password: String,
        name: String,
    },
    /// Sign in and keep the session on this device
    SignIn { email: String, password: String },
    /// End the stored session
    SignOut,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the device configuration
    Show,
    /// Set the backend URL and API key
    SetRemote { url: String, api_key: String },
}

/// Wiring shared by every command
struct App {
    data_dir: PathBuf,
    config: AppConfig,
    store: Arc<LocalStore>,
    engine: Arc<SyncEngine>,
    rest: Option<Arc<RestRemote>>,
}

impl App {
    async fn open(data_dir: PathBuf, config: AppConfig) -> Result<Self> {
        let db_path = config.database_path(&data_dir);
        debug!(path = %db_path.display(), "Opening local store");
        let store = Arc::new(LocalStore::new(&db_path));

        let (remote, reachability, rest): (Arc<dyn RemoteStore>, Arc<dyn Reachability>, _) =
            match config.remote.url.as_deref().filter(|_| config.remote.is_configured()) {
                Some(url) => {
                    let rest = Arc::new(
                        RestRemote::from_config(&config.remote).context("Invalid remote configuration")?,
                    );
                    rest.set_session(load_session(&data_dir)?);
                    let timeout = Duration::from_millis(config.remote.probe_timeout_ms);
                    let reachability: Arc<dyn Reachability> = match TcpProbe::for_url(url, timeout) {
                        Some(probe) => Arc::new(probe),
                        None => Arc::new(ManualReachability::new(NetworkStatus::offline())),
                    };
                    (rest.clone() as Arc<dyn RemoteStore>, reachability, Some(rest))
                }
                None => (
                    Arc::new(MemoryRemote::new()) as Arc<dyn RemoteStore>,
                    Arc::new(ManualReachability::new(NetworkStatus::offline())) as Arc<dyn Reachability>,
                    None,
                ),
            };

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote,
            reachability,
            config.sync.clone(),
        )?);
        engine
            .ensure_initialized()
            .await
            .with_context(|| format!("Failed to open {}", db_path.display()))?;

        Ok(Self {
            data_dir,
            config,
            store,
            engine,
            rest,
        })
    }

    fn accounts(&self) -> Result<(AccountService, Arc<RestRemote>)> {
        let Some(rest) = self.rest.clone() else {
            bail!("No remote configured; run `possync config set-remote <url> <api_key>`");
        };
        let auth: Arc<dyn AuthBackend> = rest.clone();
        let accounts = AccountService::new(auth, rest.clone(), self.store.clone());
        Ok((accounts, rest))
    }
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>, device: &str) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let mut builder = LoggingBuilder::new(filter);
    if let Some(dir) = log_dir {
        builder = builder.jsonl(dir, device);
    }
    builder.init().context("Failed to set up logging")?;
    Ok(())
}

/// Get the default data directory (~/.possync/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".possync")
        .join("data")
}

fn load_session(data_dir: &Path) -> Result<Option<Session>> {
    let path = data_dir.join(SESSION_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(Some(
        serde_json::from_str(&content).with_context(|| format!("Corrupt session file {}", path.display()))?,
    ))
}

fn save_session(data_dir: &Path, session: Option<&Session>) -> Result<()> {
    let path = data_dir.join(SESSION_FILE);
    match session {
        Some(session) => std::fs::write(&path, serde_json::to_string_pretty(session)?)?,
        None if path.exists() => std::fs::remove_file(&path)?,
        None => {}
    }
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => {
            println!(
                "Sync completed: pushed {}, pulled {}",
                report.total_pushed(),
                report.total_pulled()
            );
            for (table, rows) in &report.pushed {
                println!("  push {}: {}", table, rows);
            }
            for (table, rows) in &report.pulled {
                println!("  pull {}: {}", table, rows);
            }
        }
        SyncOutcome::Skipped(reason) => println!("Sync skipped: {}", reason),
        SyncOutcome::Failed(message) => println!("Sync failed: {}", message),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let config = AppConfig::load(&data_dir)?;

    setup_logging(cli.verbose, cli.log_dir.as_deref(), &config.device_name)?;

    // Configuration edits don't need the store
    if let Commands::Config { action } = &cli.command {
        return run_config(&data_dir, config, action);
    }

    let app = App::open(data_dir, config).await?;

    match cli.command {
        Commands::Init => {
            println!("Local store ready: {}", app.config.database_path(&app.data_dir).display());
            if let Some(report) = app.engine.bootstrap_report() {
                println!("Tables: {}", report.tables.join(", "));
                println!(
                    "Migrations: {} applied, {} already present",
                    report.migrations_applied, report.migrations_skipped
                );
            }
        }

        Commands::Status => {
            println!("PosSync v0.1.0");
            println!();
            println!("Device: {}", app.config.device_name);
            println!("Data directory: {}", app.data_dir.display());
            match &app.config.remote.url {
                Some(url) if app.config.remote.is_configured() => println!("Remote: {}", url),
                _ => println!("Remote: not configured"),
            }
            match app.rest.as_ref().and_then(|r| r.session()) {
                Some(session) => println!("Signed in: {}", session.email),
                None => println!("Signed in: no"),
            }
            println!("Engine: {}", app.engine.status());
            println!();
            println!("Pending changes:");
            for (table, count) in app.engine.pending_changes().await? {
                println!("  {}: {}", table, count);
            }
        }

        Commands::Sync { watch } => {
            if !watch {
                let outcome = app.engine.sync_data().await?;
                print_outcome(&outcome);
                if let SyncOutcome::Failed(message) = outcome {
                    bail!("Sync failed: {}", message);
                }
                return Ok(());
            }

            let mut events = app.engine.subscribe();
            let outcome = app.engine.start_sync().await?;
            print_outcome(&outcome);
            println!(
                "Syncing every {}s. Press Ctrl-C to stop.",
                app.config.sync.interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(SyncEvent::CycleCompleted { report }) => {
                            print_outcome(&SyncOutcome::Completed(report))
                        }
                        Ok(SyncEvent::CycleSkipped { reason }) => {
                            print_outcome(&SyncOutcome::Skipped(reason))
                        }
                        Ok(SyncEvent::CycleFailed { message }) => {
                            print_outcome(&SyncOutcome::Failed(message))
                        }
                        Ok(SyncEvent::StatusChanged { .. }) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            app.engine.shutdown().await;
            println!("Stopped.");
        }

        Commands::Branch { action } => {
            let branches = BranchRepo::new(app.store.clone());
            match action {
                BranchAction::Create { name, address } => {
                    let branch = branches.create(&name, address.as_deref())?;
                    println!("Created branch:");
                    println!("  ID: {}", branch.id);
                    println!("  Name: {}", branch.name);
                }
                BranchAction::List => {
                    let list = branches.list()?;
                    if list.is_empty() {
                        println!("No branches.");
                    }
                    for branch in list {
                        let sync_mark = if branch.is_synced { " " } else { "*" };
                        println!(
                            "{} {}  {}  {}",
                            sync_mark,
                            branch.id,
                            branch.name,
                            branch.address.unwrap_or_default()
                        );
                    }
                }
                BranchAction::Show { id } => {
                    let Some(branch) = branches.get(&id)? else {
                        bail!("Branch not found: {}", id);
                    };
                    println!("Branch:");
                    println!("  ID: {}", branch.id);
                    println!("  Name: {}", branch.name);
                    if let Some(address) = &branch.address {
                        println!("  Address: {}", address);
                    }
                    println!("  Updated: {}", branch.updated_at.unwrap_or_default());
                    println!("  Synced: {}", if branch.is_synced { "yes" } else { "no" });
                    if branch.deleted {
                        println!("  Deleted: yes");
                    }
                }
                BranchAction::Update { id, name, address } => {
                    let branch = branches.update(&id, name.as_deref(), address.as_deref())?;
                    println!("Updated branch {} ({})", branch.id, branch.name);
                }
                BranchAction::Delete { id } => {
                    branches.delete(&id)?;
                    println!("Deleted branch {}", id);
                }
                BranchAction::Assign {
                    branch_id,
                    user_id,
                    role,
                } => {
                    let role: AssignmentRole = role.parse().map_err(anyhow::Error::msg)?;
                    let assignment = branches.assign(&branch_id, &user_id, role)?;
                    println!(
                        "Assigned {} to {} as {}",
                        assignment.user_id, assignment.branch_id, assignment.role
                    );
                }
                BranchAction::Assignments { branch_id } => {
                    let assignments = branches.assignments(&branch_id)?;
                    if assignments.is_empty() {
                        println!("No assignments.");
                    }
                    for a in assignments {
                        println!("{}  {}", a.user_id, a.role);
                    }
                }
            }
        }

        Commands::Profile { action } => {
            let profiles = ProfileRepo::new(app.store.clone());
            match action {
                ProfileAction::List { role } => {
                    let role = role
                        .map(|r| r.parse::<Role>())
                        .transpose()
                        .map_err(anyhow::Error::msg)?;
                    let list = profiles.list(role)?;
                    if list.is_empty() {
                        println!("No profiles.");
                    }
                    for p in list {
                        println!("{}  {}  {}  {}", p.id, p.email, p.role, p.name.unwrap_or_default());
                    }
                }
                ProfileAction::Show { id } => {
                    let Some(p) = profiles.get(&id)? else {
                        bail!("Profile not found: {}", id);
                    };
                    println!("Profile:");
                    println!("  ID: {}", p.id);
                    println!("  Email: {}", p.email);
                    println!("  Name: {}", p.name.unwrap_or_default());
                    println!("  Role: {}", p.role);
                    println!("  Synced: {}", if p.is_synced { "yes" } else { "no" });
                }
                ProfileAction::Rename { id, name } => {
                    let p = profiles.update_name(&id, &name)?;
                    println!("Renamed {} to {}", p.id, name);
                }
                ProfileAction::SetRole {
                    actor,
                    target,
                    role,
                } => {
                    let role: Role = role.parse().map_err(anyhow::Error::msg)?;
                    let p = profiles.set_role(&actor, &target, role)?;
                    println!("{} is now {}", p.email, p.role);
                }
            }
        }

        Commands::Auth { action } => {
            let (accounts, rest) = app.accounts()?;
            match action {
                AuthAction::SignUp {
                    email,
                    password,
                    name,
                } => {
                    let (session, profile) = accounts.sign_up(&email, &password, &name).await?;
                    save_session(&app.data_dir, Some(&session))?;
                    println!("Account created:");
                    println!("  ID: {}", profile.id);
                    println!("  Role: {}", profile.role);
                }
                AuthAction::SignIn { email, password } => {
                    let session = accounts.sign_in(&email, &password).await?;
                    save_session(&app.data_dir, Some(&session))?;
                    println!("Signed in as {}", session.email);
                }
                AuthAction::SignOut => {
                    let Some(session) = rest.session() else {
                        bail!("Not signed in");
                    };
                    accounts.sign_out(&session).await?;
                    save_session(&app.data_dir, None)?;
                    println!("Signed out.");
                }
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn run_config(data_dir: &Path, mut config: AppConfig, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Device: {}", config.device_name);
            println!("Database: {}", config.database_path(data_dir).display());
            println!(
                "Remote: {}",
                config.remote.url.as_deref().unwrap_or("not configured")
            );
            println!("Sync interval: {}s", config.sync.interval.as_secs());
            println!("Batch size: {}", config.sync.batch_size);
        }
        ConfigAction::SetRemote { url, api_key } => {
            config.remote.url = Some(url.clone());
            config.remote.api_key = Some(api_key.clone());
            let path = config.save(data_dir)?;
            println!("Remote set to {} ({})", url, path.display());
        }
    }
    Ok(())
}
