mod app;
mod commands;
mod config;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::App;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "studyroom", version, about = "Study rooms from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Default)]
struct Credentials {
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Print the browser URL for a federated sign-in
    LoginUrl {
        provider: String,
        #[arg(long)]
        redirect: Option<String>,
    },
    /// Check that a room exists
    Join { code: String },
    /// Create a room owned by the signed-in user
    Create {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Follow a room's chat; type to send, /clear, /end or /quit
    Chat {
        code: String,
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Generate and save the session analysis, then show the report
    End { code: String },
    /// Archive a room's session on the server
    Archive { code: String },
    /// Show a room's summary
    Summary { code: String },
    /// Show a room's message and insight counts
    Stats { code: String },
    /// Show the skill signals detected in a room
    Skills { code: String },
    /// Show stats, skill signals and summary for a room
    Report { code: String },
    /// Past sessions of a room, or of the signed-in user when no room is given
    History {
        code: Option<String>,
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Generate quiz questions from a room's conversation
    Quiz { code: String },
    /// Update the signed-in user's profile
    Profile {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        name: Option<String>,
        /// Image file to upload as the new avatar
        #[arg(long)]
        avatar: Option<PathBuf>,
        /// Switch back to one of the recent avatar URLs
        #[arg(long)]
        select: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studyroom=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let app = App::build(config).await?;

    match cli.command {
        Command::Signup { email, password } => commands::signup(&app, &email, &password).await,
        Command::LoginUrl { provider, redirect } => {
            commands::login_url(&app, &provider, redirect.as_deref())
        }
        Command::Join { code } => commands::join(&app, &code).await,
        Command::Create { credentials } => {
            sign_in(&app, &credentials).await?;
            commands::create(&app).await
        }
        Command::Chat { code, credentials } => {
            sign_in(&app, &credentials).await?;
            commands::chat(&app, &code).await
        }
        Command::End { code } => commands::end(&app, &code).await,
        Command::Archive { code } => commands::archive(&app, &code).await,
        Command::Summary { code } => commands::summary(&app, &code).await,
        Command::Stats { code } => commands::stats(&app, &code).await,
        Command::Skills { code } => commands::skills(&app, &code).await,
        Command::Report { code } => commands::report(&app, &code).await,
        Command::History { code, credentials } => {
            sign_in(&app, &credentials).await?;
            commands::history(&app, code.as_deref()).await
        }
        Command::Quiz { code } => commands::quiz(&app, &code).await,
        Command::Profile {
            credentials,
            name,
            avatar,
            select,
        } => {
            sign_in(&app, &credentials).await?;
            commands::profile(&app, name.as_deref(), avatar, select.as_deref()).await
        }
    }
}

async fn sign_in(app: &App, credentials: &Credentials) -> anyhow::Result<()> {
    app.sign_in(credentials.email.as_deref(), credentials.password.as_deref())
        .await
}
