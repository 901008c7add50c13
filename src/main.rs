use anyhow::Context;
use clap::{Parser, Subcommand};
use profile_store::api::{create_router, AppState};
use profile_store::profiles::{
    AuthUser, FirebaseAuth, FirebaseConfig, FirestoreStore, LocalAuth, MemoryStore, ProfileData,
    ProfileStore, ServiceAccountTokens, TokenSource, DEFAULT_RECENT_LIMIT,
};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(about = "Student profiles and activity logs on Firebase")]
struct Args {
    /// TOML config file; the environment is used when omitted
    #[clap(long)]
    config: Option<PathBuf>,

    /// Keep documents in process memory instead of Firestore
    #[clap(long)]
    in_memory: bool,

    /// Run the interactive sign-in before the command
    #[clap(long)]
    sign_in: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[clap(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
    GetProfile {
        user_id: String,
    },
    UpsertProfile {
        user_id: String,
        /// Profile fields as a JSON object
        #[clap(long)]
        json: String,
    },
    LogActivity {
        user_id: String,
        action: String,
        /// Details as a JSON object
        #[clap(long)]
        details: Option<String>,
    },
    RecentActivity {
        user_id: String,
        #[clap(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },
    /// Sign in and print the signed-in user
    SignIn,
    /// End the current session
    SignOut,
}

async fn build_store(config: &FirebaseConfig, in_memory: bool) -> anyhow::Result<ProfileStore> {
    if in_memory {
        info!("Using in-memory document store");
        return Ok(ProfileStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalAuth::new(AuthUser::new("local-user"))),
        ));
    }

    let auth = Arc::new(FirebaseAuth::new(config.clone()).context("create auth client")?);
    let tokens: Arc<dyn TokenSource> = match &config.credentials_path {
        Some(path) => Arc::new(
            ServiceAccountTokens::from_file(path)
                .await
                .context("load service account")?,
        ),
        None => auth.clone(),
    };
    let documents = FirestoreStore::new(config, Some(tokens)).context("create document store")?;

    Ok(ProfileStore::new(Arc::new(documents), auth))
}

fn parse_object(raw: &str, what: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).with_context(|| format!("parse {} as JSON", what))? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("{} must be a JSON object, got {}", what, other),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => FirebaseConfig::from_toml_file(path).context("read config")?,
        None => FirebaseConfig::from_env(),
    };

    let store = build_store(&config, args.in_memory).await?;

    if args.sign_in || matches!(args.command, Command::SignIn) {
        let user = store.sign_in_interactive().await.context("sign in")?;
        print_json(&user)?;
    }

    match args.command {
        Command::Serve { addr } => {
            let listener = TcpListener::bind(addr).await.context("bind API address")?;
            info!("Profile API listening on {}", addr);
            axum::serve(listener, create_router(AppState { store: store.clone() }))
                .await
                .context("serve API")?;
        }
        Command::GetProfile { user_id } => match store.fetch_profile(&user_id).await? {
            Some(profile) => print_json(&profile)?,
            None => println!("No profile for '{}'", user_id),
        },
        Command::UpsertProfile { user_id, json } => {
            let data: ProfileData = serde_json::from_value(Value::Object(parse_object(
                &json,
                "profile",
            )?))
            .context("profile fields")?;
            store.upsert_profile(&user_id, &data).await?;
            println!("Saved profile for '{}'", user_id);
        }
        Command::LogActivity {
            user_id,
            action,
            details,
        } => {
            let details = match details {
                Some(raw) => parse_object(&raw, "details")?,
                None => Map::new(),
            };
            store.log_activity(&user_id, &action, details).await?;
            println!("Logged '{}' for '{}'", action, user_id);
        }
        Command::RecentActivity { user_id, limit } => {
            let activity = store.fetch_recent_activity(&user_id, limit).await?;
            print_json(&activity)?;
        }
        Command::SignIn => {}
        Command::SignOut => {
            store.sign_out().await.context("sign out")?;
            info!("Signed out");
            println!("Signed out");
        }
    }

    if store.current_user().await.is_some() {
        store.sign_out().await?;
    }

    Ok(())
}
