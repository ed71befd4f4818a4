//! Reportcast CLI - listens for realtime report notifications.
//!
//! This is the main binary entry point. See the `reportcast` library for
//! the core functionality.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use reportcast::credentials::{self, CredentialStore};
use reportcast::toast::{ToastEffect, ToastFrame, ToastView};
use reportcast::{
    ApiClient, Config, ConnectionContext, LifecycleOutcome, NotificationStore, ToastDriver,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "reportcast")]
#[command(version)]
#[command(about = "Realtime report notifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print notifications until Ctrl-C
    Listen,
    /// Print the server-side unread count
    Unread,
    /// Store the bearer token
    Login {
        #[arg(long)]
        token: String,
    },
    /// Remove the stored bearer token
    Logout,
    /// Print the effective configuration
    Config,
}

/// Prints toasts to stdout.
#[derive(Debug, Default)]
struct ConsoleToast {
    visible: Option<String>,
}

impl ToastView for ConsoleToast {
    fn render(&mut self, frame: Option<&ToastFrame>) {
        let id = frame.map(|f| f.id.clone());
        if id != self.visible {
            if let Some(frame) = frame {
                log::trace!(
                    "[Toast] Rendering {} ({:?}, progress {:.2})",
                    frame.id,
                    frame.style.tone,
                    frame.progress
                );
            }
            self.visible = id;
        }
    }

    fn on_effect(&mut self, effect: &ToastEffect) {
        match effect {
            ToastEffect::Shown(id) | ToastEffect::Replaced { current: id, .. } => {
                println!("[toast] {}", id);
            }
            ToastEffect::MarkRead(id) => println!("[toast] {} read", id),
            ToastEffect::Held(_) | ToastEffect::Dismissing(_) => {}
        }
    }
}

async fn listen(config: Config, store_creds: Arc<dyn CredentialStore>) -> Result<()> {
    let api = Arc::new(ApiClient::new(&config, Arc::clone(&store_creds))?);
    let ctx = ConnectionContext::new(&config, store_creds, Arc::clone(&api) as _);
    let store = NotificationStore::new(api, config.locale.clone());

    match ctx.start().await {
        LifecycleOutcome::Connecting | LifecycleOutcome::AlreadyConnected => {}
        other => {
            println!("Realtime unavailable ({:?}); showing unread count only", other);
        }
    }

    if config.user_id.is_none() {
        println!("No user configured; not listening for notifications");
    }

    let printer = store.clone();
    let _printing = store.register_refresh_callback(Arc::new(move || {
        if let Some(n) = printer.notifications().first() {
            println!("{}\n  {}", n.title, n.message.replace('\n', "\n  "));
        }
    }));

    let toast = ToastDriver::spawn(store.clone(), ConsoleToast::default());

    tokio::select! {
        followed = store.follow_connection(&ctx, config.user_id.as_deref()) => followed?,
        signal = tokio::signal::ctrl_c() => signal.context("failed to listen for Ctrl-C")?,
    }

    toast.unmount().await;
    store.detach(&ctx);
    ctx.teardown().await;
    store.settle().await;
    println!("Unread: {}", store.unread_count());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let creds = credentials::default_store()?;

    match cli.command {
        Commands::Listen => listen(config, creds).await?,
        Commands::Unread => {
            let api = ApiClient::new(&config, creds)?;
            println!("{}", api.unread_count().await?);
        }
        Commands::Login { token } => {
            creds.set_token(&token)?;
            println!("Token saved.");
        }
        Commands::Logout => {
            creds.clear()?;
            println!("Token removed.");
        }
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}
