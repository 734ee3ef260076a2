use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hk_replica::sync::SyncOutcome;
use hk_replica::{ClientConfig, ReplicaClient};
use serde::Serialize;

const SERVICE_NAME: &str = "hk-cli";

#[derive(Parser)]
#[command(name = "hk", version, about = "Hotel field-staff replication and notification tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,
    /// Apply server database migrations
    Migrate,
    /// Print a signed access token for a user
    IssueToken {
        #[arg(long)]
        user_id: i64,
    },
    /// Push local changes, optionally followed by a full table pull
    Sync {
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Remove notifications older than the retention window
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = hk_api::load_config()?;
            hk_api::run(config).await?;
        }
        Commands::Migrate => {
            hk_core::logging::init(SERVICE_NAME);
            let database_url = hk_core::config::required_env("DATABASE_URL")?;
            let pool = hk_core::db::connect(&database_url).await?;
            let version = hk_core::migrations::run(&pool).await?;
            println!("{}", serde_json::json!({ "schema_version": version }));
        }
        Commands::IssueToken { user_id } => {
            let jwt = hk_api::jwt_config_from_env()?;
            let (token, claims) = hk_core::auth::issue_token(user_id, &jwt)?;
            println!(
                "{}",
                serde_json::json!({ "token": token, "expires_at": claims.exp })
            );
        }
        Commands::Sync { full } => {
            hk_core::logging::init(SERVICE_NAME);
            let client = replica_client().await?;
            let line = if full {
                report(&client.sync().full_sync(false).await.context("full sync failed")?)?
            } else {
                report(&client.sync().sync_pending(false).await.context("sync failed")?)?
            };
            let status = client.sync().status().await?;
            client.shutdown().await;

            println!("{line}");
            println!("{}", serde_json::to_string(&status)?);
        }
        Commands::Sweep => {
            hk_core::logging::init(SERVICE_NAME);
            let client = replica_client().await?;
            let removed = client.swept_at_start()
                + client
                    .receiver()
                    .sweep_expired(chrono::Utc::now())
                    .await?;
            client.shutdown().await;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
    }

    Ok(())
}

async fn replica_client() -> Result<ReplicaClient> {
    let config = ClientConfig::from_env();
    ReplicaClient::start(config)
        .await
        .context("failed to open the replica")
}

fn report<T: Serialize>(outcome: &SyncOutcome<T>) -> Result<String> {
    let value = match outcome {
        SyncOutcome::Completed(summary) => {
            serde_json::json!({ "outcome": "completed", "summary": summary })
        }
        SyncOutcome::Skipped(reason) => serde_json::json!({ "outcome": "skipped", "reason": reason }),
        SyncOutcome::Failed(error) => serde_json::json!({ "outcome": "failed", "error": error }),
    };
    Ok(serde_json::to_string(&value)?)
}
