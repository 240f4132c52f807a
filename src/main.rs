use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tollgate::config::Config;
use tollgate::gateway;
use tollgate::gateway::auth;
use tollgate::quota::Tier;
use tollgate::store;
use tollgate::store::accounts;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tollgate", about = "Quota-enforcing streaming AI completion gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway.
    Serve {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the bind port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create an account and print a fresh bearer token for it.
    CreateAccount {
        /// Account id; generated when omitted.
        #[arg(long)]
        account_id: Option<String>,
        /// Entitlement tier: free, basic, or pro.
        #[arg(long, default_value = "free")]
        tier: String,
        /// Path to a TOML config file (for the database location).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match Cli::parse().command {
        Command::Serve { config, host, port } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            gateway::run_gateway(config).await
        }
        Command::CreateAccount {
            account_id,
            tier,
            config,
        } => {
            let config = Config::load(config.as_deref())?;
            let pool = store::connect(&config.database_path).await?;

            let account_id =
                account_id.unwrap_or_else(|| format!("acct_{}", uuid::Uuid::new_v4().simple()));
            let tier = Tier::from_stored(&tier);
            accounts::create_account(&pool, &account_id, tier, Utc::now().date_naive())
                .await
                .map_err(|error| anyhow::anyhow!(error.message))?;

            let token = auth::generate_token();
            accounts::insert_credential(&pool, &auth::hash_token(&token), &account_id)
                .await
                .map_err(|error| anyhow::anyhow!(error.message))?;

            println!("account: {account_id}");
            println!("tier:    {tier}");
            println!("token:   {token}");
            Ok(())
        }
    }
}
