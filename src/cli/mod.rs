//! # Command Line Interface
//!
//! `tpl [options] <template-file|->` renders a template to stdout or to
//! `--output`. Secrets are only written once the whole template rendered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{BackendOptions, RenderConfig, TemplateSource};
use crate::secrets::{AzureConfig, VaultConfig};
use crate::template::{Delimiters, DEFAULT_LEFT_DELIMITER, DEFAULT_RIGHT_DELIMITER};
use crate::world::World;

#[derive(Parser, Debug)]
#[command(name = "tpl")]
#[command(about = "Render templates with secrets from Vault and Azure Key Vault")]
#[command(version = crate::VERSION)]
pub struct Cli {
    /// Template file, or `-` to read from stdin
    pub template: String,

    /// Output file (created with mode 0600); stdout if omitted
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Prefix for all Vault paths
    #[arg(long, default_value = "")]
    pub vault_prefix: String,

    /// Key mapping file for Vault keys
    #[arg(long)]
    pub vault_mapping: Option<PathBuf>,

    /// Prefix for all Azure Key Vault paths
    #[arg(long, default_value = "")]
    pub azure_prefix: String,

    /// Key mapping file for Azure Key Vault keys
    #[arg(long)]
    pub azure_mapping: Option<PathBuf>,

    /// Replace characters Azure Key Vault rejects in secret names with `-`
    #[arg(long)]
    pub azure_sanitize_paths: bool,

    /// Data definitions (e.g. --data=name=file.yaml)
    #[arg(long, value_delimiter = ',')]
    pub data: Vec<String>,

    /// Left delimiter used within the template
    #[arg(long, default_value = DEFAULT_LEFT_DELIMITER)]
    pub left_delimiter: String,

    /// Right delimiter used within the template
    #[arg(long, default_value = DEFAULT_RIGHT_DELIMITER)]
    pub right_delimiter: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> RenderConfig {
        RenderConfig {
            template: TemplateSource::from_arg(&self.template),
            output: self.output,
            vault: BackendOptions { prefix: self.vault_prefix, mapping_file: self.vault_mapping },
            azure: BackendOptions { prefix: self.azure_prefix, mapping_file: self.azure_mapping },
            azure_sanitize_paths: self.azure_sanitize_paths,
            data: self.data,
            delimiters: Delimiters::new(self.left_delimiter, self.right_delimiter),
        }
    }
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialise_logging(cli.verbose)?;
    debug!(app_name = crate::APP_NAME, version = crate::VERSION, "Starting");

    let config = cli.into_config();
    let output = render(&config, VaultConfig::from_env(), AzureConfig::from_env()).await?;
    write_output(config.output.as_deref(), &output).await
}

/// Renders the configured template and returns the output.
pub async fn render(
    config: &RenderConfig,
    vault: VaultConfig,
    azure: AzureConfig,
) -> anyhow::Result<String> {
    config.validate()?;

    let registry = config.secret_registry(vault, azure).context("Failed to load key mapping")?;
    let base_dir =
        std::env::current_dir().context("Failed to determine current working directory")?;
    let data = config.load_data(&base_dir).context("Failed to load data")?;
    let source = read_template(&config.template).await?;

    let world = World::new(Arc::new(registry)).with_data(data);
    let output = world.render(&source, &config.delimiters).await.context("Failed to render")?;
    debug!(bytes = output.len(), "Rendered template");
    Ok(output)
}

async fn read_template(source: &TemplateSource) -> anyhow::Result<String> {
    match source {
        TemplateSource::Stdin => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("Failed to read template from stdin")?;
            Ok(buffer)
        }
        TemplateSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to open template {}", path.display())),
    }
}

/// Writes `output` to `path` (mode 0600 on Unix), or to stdout.
pub async fn write_output(path: Option<&Path>, output: &str) -> anyhow::Result<()> {
    match path {
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(output.as_bytes()).await.context("Failed to write to stdout")?;
            stdout.flush().await.context("Failed to write to stdout")?;
        }
        Some(path) => {
            let mut options = tokio::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            options.mode(0o600);

            let mut file = options
                .open(path)
                .await
                .with_context(|| format!("Failed to open output file {}", path.display()))?;
            file.write_all(output.as_bytes())
                .await
                .with_context(|| format!("Failed to write to output file {}", path.display()))?;
            file.flush().await?;
            info!(path = %path.display(), "Wrote rendered output");
        }
    }
    Ok(())
}

/// Logs go to stderr so they never mix with rendered output on stdout.
fn initialise_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_env_filter(filter).with_writer(std::io::stderr).finish(),
    )
    .is_err()
    {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
    Ok(())
}
