use std::{
    convert::Infallible,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use aws_sso_manager::{default_config_path, ManagerConfig, RefreshSummary, SsoManager};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "aws-sso-manager",
    version,
    about = "Refresh AWS credentials for every account and role available through AWS SSO"
)]
pub struct Cli {
    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v debug, -vv trace)")]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Install a config file, then sign in and fetch credentials")]
    Configure(ConfigureCommand),
    #[command(about = "Sign in and fetch credentials using the installed config")]
    Login,
}

#[derive(Debug, Clone, Args)]
pub struct ConfigureCommand {
    #[arg(help = "The config file to install")]
    pub config_file: PathBuf,

    #[arg(short = 'R', long, help = "Replace an already installed config")]
    pub reset: bool,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let installed = default_config_path()?;
        let summary = match self.command {
            Commands::Configure(cmd) => cmd.execute(&installed).await?,
            Commands::Login => login(&installed).await?,
        };

        for (role, error) in &summary.skipped {
            warn!(
                account_id = %role.account_id,
                role_name = %role.role_name,
                %error,
                "skipped role"
            );
        }
        info!(
            accounts = summary.accounts,
            profiles = summary.profiles,
            default_updated = summary.default_updated,
            "credentials refreshed"
        );
        Ok(())
    }
}

impl ConfigureCommand {
    async fn execute(self, installed: &Path) -> Result<RefreshSummary> {
        install(&self.config_file, installed, self.reset).await?;
        refresh(installed).await
    }
}

async fn install(config_file: &Path, installed: &Path, reset: bool) -> Result<()> {
    if installed.exists() && !reset {
        bail!(
            "a config is already installed at {}; use --reset to replace it",
            installed.display()
        );
    }

    let config = ManagerConfig::load(config_file)
        .await
        .with_context(|| format!("Failed to load config file {}", config_file.display()))?;
    info!(%config, "installing config");
    config
        .save(installed)
        .await
        .context("Failed to install config")?;
    Ok(())
}

async fn login(installed: &Path) -> Result<RefreshSummary> {
    if !installed.exists() {
        bail!(
            "no config is installed at {}; run `aws-sso-manager configure <CONFIG_FILE>` first",
            installed.display()
        );
    }
    refresh(installed).await
}

async fn refresh(installed: &Path) -> Result<RefreshSummary> {
    let config = ManagerConfig::load(installed).await?;
    let mut manager = SsoManager::builder(config)
        .config_path(installed)
        .verification_prompt(open_browser)
        .build()
        .await?;
    Ok(manager.run().await?)
}

async fn open_browser(url: Url) -> Result<(), Infallible> {
    eprintln!("Approve access in your browser: {url}");
    if let Err(error) = open::that(url.as_str()) {
        warn!(%error, "unable to open a browser; visit the URL above to continue");
    }
    Ok(())
}
