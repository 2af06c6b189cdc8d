//! CLI entry and dispatch.

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use zori_core::config::{self, BASE_URL_ENV};

mod commands;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "ZORI_LOG";

#[derive(Parser)]
#[command(name = "zori")]
#[command(version)]
#[command(about = "Command-line client for the Zori API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (overrides config)
    #[arg(long, global = true, env = BASE_URL_ENV, value_name = "URL")]
    base_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "ZORI_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account and organization, then sign in
    Register {
        #[arg(long)]
        email: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "ZORI_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        /// Name of the organization to create
        #[arg(long = "organization", value_name = "NAME")]
        organization_name: String,
    },

    /// Revoke the session on the server and forget it locally
    Logout,

    /// Show the signed-in account and session status
    Whoami {
        /// Fetch the organization from the server before printing
        #[arg(long)]
        refresh: bool,
    },

    /// Exchange the refresh token for a new session now
    Refresh,

    /// Keep the session fresh until Ctrl+C
    Keepalive,

    /// Manage projects
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Password recovery
    Recover {
        #[command(subcommand)]
        command: RecoverCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ProjectCommands {
    /// List projects
    List {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one project
    Show {
        #[arg(value_name = "PROJECT_ID")]
        id: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a project
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        website_url: String,

        /// Accept events from localhost
        #[arg(long)]
        allow_localhost: bool,
    },
    /// Update a project
    Update {
        #[arg(value_name = "PROJECT_ID")]
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        website_url: Option<String>,

        #[arg(long, value_name = "BOOL")]
        allow_localhost: Option<bool>,
    },
    /// Delete a project
    Delete {
        #[arg(value_name = "PROJECT_ID")]
        id: String,
    },
}

#[derive(clap::Subcommand)]
enum RecoverCommands {
    /// Email a recovery link
    Request {
        #[arg(long)]
        email: String,
    },
    /// Set a new password with a recovery token
    Confirm {
        #[arg(long)]
        token: String,

        /// New password (read from stdin when omitted)
        #[arg(long, env = "ZORI_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Print the config file path
    Path,
    /// Write a default config file
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

/// Logs go to stderr so stdout stays parseable.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .try_init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli { command, base_url } = cli;

    // Config commands must work even when the stored config is broken.
    let connect = || -> Result<commands::Context> {
        let config = config::Config::load().context("load config")?;
        commands::Context::new(config, base_url.as_deref())
    };

    match command {
        Commands::Login { email, password } => {
            commands::auth::login(&connect()?, email, password).await
        }
        Commands::Register {
            email,
            password,
            first_name,
            last_name,
            organization_name,
        } => {
            let args = commands::auth::RegisterArgs {
                email,
                password,
                first_name,
                last_name,
                organization_name,
            };
            commands::auth::register(&connect()?, args).await
        }
        Commands::Logout => commands::auth::logout(&connect()?).await,
        Commands::Whoami { refresh } => commands::auth::whoami(&connect()?, refresh).await,
        Commands::Refresh => commands::auth::refresh(&connect()?).await,
        Commands::Keepalive => commands::keepalive::run(&connect()?).await,

        Commands::Projects { command } => {
            let ctx = connect()?;
            match command {
                ProjectCommands::List { json } => commands::projects::list(&ctx, json).await,
                ProjectCommands::Show { id, json } => {
                    commands::projects::show(&ctx, &id, json).await
                }
                ProjectCommands::Create {
                    name,
                    website_url,
                    allow_localhost,
                } => commands::projects::create(&ctx, name, website_url, allow_localhost).await,
                ProjectCommands::Update {
                    id,
                    name,
                    website_url,
                    allow_localhost,
                } => {
                    commands::projects::update(&ctx, &id, name, website_url, allow_localhost)
                        .await
                }
                ProjectCommands::Delete { id } => commands::projects::delete(&ctx, &id).await,
            }
        }

        Commands::Recover { command } => {
            let ctx = connect()?;
            match command {
                RecoverCommands::Request { email } => commands::auth::recover(&ctx, email).await,
                RecoverCommands::Confirm { token, password } => {
                    commands::auth::recover_confirm(&ctx, token, password).await
                }
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
