use clap::{Parser, Subcommand};
use email_address::EmailAddress;
use invite_link::{
    config::{Config, ConfigModel},
    invite_server::InviteServer,
    notifier::LogNotifier,
};
use std::{error::Error, str::FromStr, sync::Arc};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "invite-link", version, about = "Signed, expiring invitation links")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "INVITE_LINK_CONFIG", default_value = "invite-link.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the invitation acceptance endpoint
    Serve,
    /// Send an invitation to the given address
    Invite { email: String },
}

fn init_tracing(log_directory: Option<&str>) -> Option<WorkerGuard> {
    let level = if cfg!(feature = "debug-logging") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match log_directory {
        Some(log_directory) => {
            let file_appender = tracing_appender::rolling::daily(log_directory, "invite-link.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let model = ConfigModel::from_file(&cli.config)?;
    let _guard = init_tracing(model.log_directory.as_deref());
    let config = Config::from_model(model)?;

    let builder = InviteServer::builder()
        .config(config)
        .notifier(Arc::new(LogNotifier));

    match cli.command {
        Command::Invite { email } => {
            let email = match EmailAddress::from_str(&email) {
                Ok(email) => email,
                Err(err) => return Err(format!("invalid email address {}: {}", email, err).into()),
            };
            let invite_server = builder.build()?;
            let invitation = invite_server.invite_manager.invite_user(email)?;
            println!("{}", serde_json::to_string(&invitation)?);
        }
        Command::Serve => {
            let (invite_server, handle) = builder.start_server().await?;
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            invite_server.signals.stop();
            handle.await??;
        }
    }

    Ok(())
}
