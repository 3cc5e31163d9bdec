//! Access Broker CLI
//!
//! Resolves sessions, reports managed-state verdicts and runs the Identity
//! Center synchronizer against an access config file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use access_broker::aws::{load_sdk_config, SdkCredentialSource, StsRoleAssumer};
use aws_types::SdkConfig;
use access_broker::gcp::GcpImpersonationIssuer;
use access_broker::identity_center::AwsIdentityCenterClient;
use access_broker::model::{AccessTarget, Purpose, Region};
use access_broker::{
    AccessConfig, CredentialBroker, IdentityCenterSynchronizer, Session, SessionCache,
};

/// Access Broker - cloud account credential resolution
#[derive(Parser, Debug)]
#[command(name = "access-broker", version, about)]
struct Args {
    /// Access config file (JSON)
    #[arg(long, env = "ACCESS_BROKER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a session and print its chain, region and expiry
    Session {
        /// AWS account id, GCP project id or Okta idp name
        #[arg(long)]
        account: String,

        #[arg(long, default_value = "read")]
        purpose: Purpose,

        /// Overrides the account's default region (AWS only)
        #[arg(long)]
        region: Option<Region>,
    },

    /// Print the managed-state verdict for an account
    Verdict {
        #[arg(long)]
        account: String,

        #[arg(long)]
        purpose: Purpose,
    },

    /// Refresh the Identity Center snapshot for an account
    Sync {
        #[arg(long)]
        account: String,

        /// Sync interval in seconds
        #[arg(long, default_value = "900", env = "SYNC_INTERVAL")]
        interval: u64,

        /// Run once and exit (for CronJob mode)
        #[arg(long, default_value = "false")]
        once: bool,
    },
}

/// What `session` prints; never the secret material
#[derive(Debug, Serialize)]
struct SessionSummary<'a> {
    account_id: &'a str,
    role_chain: &'a [String],
    region: &'a str,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Session> for SessionSummary<'a> {
    fn from(session: &'a Session) -> Self {
        Self {
            account_id: &session.account_id,
            role_chain: &session.role_chain,
            region: &session.region,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .json()
        .init();

    let args = Args::parse();

    let config = AccessConfig::load(&args.config)
        .await
        .with_context(|| format!("Failed to load access config {}", args.config.display()))?;
    let sdk_config = load_sdk_config(config.broker.default_region, config.broker.call_timeout()).await;
    let broker = Arc::new(build_broker(&config, &sdk_config)?);

    match args.command {
        Command::Session {
            account,
            purpose,
            region,
        } => {
            let target = target_for(&config, &account);
            let session = match (&target, region) {
                (AccessTarget::Aws(account_id), Some(region)) => {
                    broker
                        .get_session_in_region(account_id, purpose, Some(region))
                        .await?
                }
                _ => target.resolve_session(&broker, purpose).await?,
            };

            println!("{}", serde_json::to_string_pretty(&SessionSummary::from(session.as_ref()))?);
        }

        Command::Verdict { account, purpose } => {
            let verdict = broker.verdict(&account, purpose)?;
            println!("{}", verdict);
        }

        Command::Sync {
            account,
            interval: secs,
            once,
        } => {
            let client = AwsIdentityCenterClient::new(sdk_config);
            let synchronizer = IdentityCenterSynchronizer::new(Arc::clone(&broker), Arc::new(client));

            info!(account_id = %account, interval = secs, once, "Starting Identity Center sync");

            if once {
                synchronizer.sync(&account).await?;
            } else {
                let mut ticker = interval(Duration::from_secs(secs));

                loop {
                    ticker.tick().await;

                    if let Err(e) = synchronizer.sync(&account).await {
                        error!(account_id = %account, error = %e, "Sync cycle failed");
                    }
                }
            }
        }
    }

    Ok(())
}

fn build_broker(config: &AccessConfig, sdk_config: &SdkConfig) -> Result<CredentialBroker> {
    let registry = Arc::new(config.registry().context("Invalid account registry")?);
    let cache = Arc::new(SessionCache::new(config.broker.safety_margin()));

    Ok(CredentialBroker::new(
        registry,
        cache,
        Arc::new(SdkCredentialSource::new(sdk_config.clone())),
        Arc::new(StsRoleAssumer::new(sdk_config.clone())),
        config.broker.clone(),
    )
    .with_token_issuer(Arc::new(GcpImpersonationIssuer::new())))
}

/// GCP projects and Okta organizations are looked up by id first; anything
/// else is treated as an AWS account id.
fn target_for(config: &AccessConfig, id: &str) -> AccessTarget {
    if let Some(project) = config.gcp_project(id) {
        AccessTarget::GcpProject(project.clone())
    } else if let Some(org) = config.okta_organization(id) {
        AccessTarget::OktaDomain(org.clone())
    } else {
        AccessTarget::Aws(id.to_string())
    }
}
