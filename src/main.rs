use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use learntav_auth::clock::SystemClock;
use learntav_auth::gatekeeper::RouteDecision;
use learntav_auth::security::{AlertLevel, DeviceInfo};
use learntav_auth::storage::{MemoryStorage, SqliteStorage, Storage};
use learntav_auth::{config, AuthService, Config, LoginRequest};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "learntav-auth",
    about = "Manage LearnTAV accounts, sessions and the admin gate",
    version
)]
struct Cli {
    /// Config file (default: platform config dir, or $LEARNTAV_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding local.db (overrides [storage].data_dir)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Log in and start a session
    ///
    /// Without --remember the session ends when this command exits, so
    /// later `whoami`, `route` or `csrf` calls see no login. Pass --remember
    /// to keep it in local storage.
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
        /// Keep the session for later commands
        #[arg(long)]
        remember: bool,
    },

    /// Show the logged-in user
    Whoami,

    /// End the current session
    Logout,

    /// Check a form's CSRF token against the current session
    Csrf {
        token: String,
    },

    /// Revoke every session of a user
    Revoke {
        #[arg(long)]
        email: String,
    },

    /// Check access to a page path
    Route {
        path: String,
    },

    /// Admin passcode gate
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },

    /// Remove expired sessions now
    Sweep,

    /// Run the periodic session sweeper until Ctrl-C
    Watch,

    /// Inspect stored auth state for defects
    Diagnose {
        #[arg(long)]
        json: bool,
    },

    /// Show recent security events
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only warnings and above
        #[arg(long)]
        alerts: bool,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Unlock the admin pages with the passcode
    Unlock { code: String },
    Status,
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = Some(dir);
    }
    init_logging(&config);

    let db_path = config.local_db_path();
    let local: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&db_path)
            .with_context(|| format!("Failed to open local storage at {}", db_path.display()))?,
    );
    let tab: Arc<dyn Storage> = Arc::new(MemoryStorage::new("tab"));
    let service = AuthService::new(&config, local, tab, Arc::new(SystemClock));
    let device = DeviceInfo::from_host();

    match cli.command {
        Command::Register {
            name,
            email,
            password,
        } => {
            let password = password_or_stdin(password)?;
            let user = service.register(&name, &email, &password)?;
            println!("Registered {} ({})", user.email, user.id);
        }
        Command::Login {
            email,
            password,
            remember,
        } => {
            let password = password_or_stdin(password)?;
            let outcome = service.login(&LoginRequest {
                email: &email,
                password: &password,
                remember_me: remember,
                device: Some(&device),
            })?;
            println!("Logged in as {}", outcome.user.full_name);
            println!("  session: {}", outcome.session.id);
            println!("  expires: {}", outcome.session.expires.to_rfc3339());
            println!("  csrf:    {}", outcome.session.csrf_token);
            if !remember {
                println!("Session ends with this command; use --remember to keep it");
            }
        }
        Command::Whoami => match service.current_user(Some(&device))? {
            Some((user, session)) => {
                println!("{} <{}> [{}]", user.full_name, user.email, user.role.as_str());
                println!("  session: {} (expires {})", session.id, session.expires.to_rfc3339());
            }
            None => println!("Not logged in"),
        },
        Command::Logout => match service.logout()? {
            Some(pointer) => println!("Logged out (session {})", pointer.session_id),
            None => println!("Not logged in"),
        },
        Command::Csrf { token } => {
            let session = service.verify_csrf(&token, Some(&device))?;
            println!("CSRF token valid for session {}", session.id);
            if session.csrf_token != token {
                println!("  renewed csrf: {}", session.csrf_token);
            }
        }
        Command::Revoke { email } => {
            let revoked = service.revoke_user(&email)?;
            println!("Revoked {revoked} session(s) for {email}");
        }
        Command::Route { path } => {
            let decision = service.check_route(&path, Some(&device))?;
            let kind = service.routes().classify(&path).kind;
            println!("{path} [{kind}] -> {decision}");
            if !matches!(decision, RouteDecision::Allow) {
                std::process::exit(2);
            }
        }
        Command::Admin { command } => {
            warn_default_passcode(&service);
            run_admin(&service, command)?;
        }
        Command::Sweep => {
            let removed = service.sweep()?;
            println!("Removed {removed} expired session(s)");
        }
        Command::Watch => {
            let every = std::time::Duration::from_secs(config.session.sweep_interval_secs);
            let handle = service.sessions().clone().spawn_sweeper(every);
            println!("Sweeping every {}s; Ctrl-C to stop", every.as_secs());
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            handle.abort();
            tracing::info!("Session sweeper stopped");
        }
        Command::Diagnose { json } => {
            warn_default_passcode(&service);
            let report = service.diagnose()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} user(s), {} session(s) ({} active), admin session: {}",
                    report.users,
                    report.sessions,
                    report.active_sessions,
                    if report.admin_session_active { "active" } else { "none" }
                );
                for finding in &report.findings {
                    println!("  {finding}");
                }
                if report.findings.is_empty() {
                    println!("  no findings");
                }
            }
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }
        Command::Logs { limit, alerts } => {
            let log = service.security_log();
            let mut events = if alerts {
                log.alerts(AlertLevel::Warning)?
            } else {
                log.recent(limit)?
            };
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
            for event in events {
                println!(
                    "{} {:<8} {:?} {} {}",
                    event.timestamp.to_rfc3339(),
                    event.level.as_str(),
                    event.kind,
                    event.subject,
                    event.details
                );
            }
        }
        Command::Config => print!("{}", config.to_toml()?),
    }
    Ok(())
}

fn run_admin(service: &AuthService, command: AdminCommand) -> Result<()> {
    match command {
        AdminCommand::Unlock { code } => {
            let session = service.admin_unlock(&code)?;
            println!("Admin unlocked until {}", session.expires.to_rfc3339());
        }
        AdminCommand::Status => {
            let status = service.admin_status()?;
            match status.expires {
                Some(expires) if status.authenticated => {
                    println!("Admin session active until {}", expires.to_rfc3339());
                }
                _ => println!("No admin session"),
            }
            if let Some(until) = status.locked_until {
                println!("Locked until {}", until.to_rfc3339());
            } else if status.failed_attempts > 0 {
                println!("{} failed attempt(s)", status.failed_attempts);
            }
        }
        AdminCommand::Logout => {
            if service.admin_logout()? {
                println!("Admin session ended");
            } else {
                println!("No admin session");
            }
        }
    }
    Ok(())
}

fn warn_default_passcode(service: &AuthService) {
    if service.admin_uses_default_passcode() {
        tracing::warn!("Admin gate is using the default passcode; set [admin].passcode");
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn password_or_stdin(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
