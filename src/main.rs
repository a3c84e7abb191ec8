mod config;
mod exec;
mod fleet;
mod provider;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, RawEnv};
use crate::exec::{SshCredentials, SshExecutor};
use crate::fleet::{BatchReport, Dispatcher, FleetService, SpawnOptions};
use crate::provider::digitalocean::DigitalOceanProvider;

#[derive(Parser)]
#[command(name = "boxfleet", about = "Spawn, inspect and drive fleets of cloud boxes")]
struct Cli {
    /// Config file (defaults to $BOXFLEET_CONFIG or ~/.config/boxfleet/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add boxes to a fleet, numbering after the current members
    Spawn {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value_t = 1)]
        count: usize,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        ssh_fingerprint: Option<String>,
        /// Provider tag, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List every box in the account
    Ls,
    /// List the members of a fleet
    Fleet { name: String },
    /// Show one box by exact label
    Get { name: String },
    /// Delete a box (exact label) or a whole fleet (prefix)
    Delete { name: String },
    /// Run a shell command on a box or on every fleet member
    Run {
        name: String,
        command: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// List user images
    Images,
    /// Snapshot a box into a new image
    Snapshot { name: String, label: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), &RawEnv::from_env())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("boxfleet=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_writer(std::io::stderr)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = config.sentry_dsn.clone().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.environment.clone().into()),
                traces_sample_rate: 0.2,
                enable_logs: true,
                ..Default::default()
            },
        ))
    });

    let service = build_service(&config)?;
    run(cli.command, &config, &service).await
}

fn build_service(config: &Config) -> Result<FleetService> {
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let provider = DigitalOceanProvider::new(
        http_client,
        config.digitalocean.api_url.clone(),
        config.token()?.to_string(),
    )
    .with_droplet_password(config.digitalocean.password.clone());

    let executor = SshExecutor::new(
        config.ssh.max_output_bytes,
        config.ssh.timeout_secs.map(Duration::from_secs),
    );
    let dispatcher = Dispatcher::new(Arc::new(executor), config.dispatch.max_concurrency);

    Ok(FleetService::new(Arc::new(provider), dispatcher))
}

async fn run(command: Command, config: &Config, service: &FleetService) -> Result<ExitCode> {
    match command {
        Command::Spawn {
            name,
            count,
            image,
            region,
            size,
            ssh_fingerprint,
            tags,
        } => {
            let defaults = &config.digitalocean;
            let opts = SpawnOptions {
                image: image.unwrap_or_else(|| defaults.image.clone()),
                region: region.unwrap_or_else(|| defaults.region.clone()),
                size: size.unwrap_or_else(|| defaults.size.clone()),
                ssh_fingerprint: ssh_fingerprint
                    .unwrap_or_else(|| defaults.ssh_fingerprint.clone()),
                tags: if tags.is_empty() { defaults.tags.clone() } else { tags },
            };
            for new_name in service.spawn_fleet(&name, count, opts).await? {
                println!("{new_name}");
            }
        }
        Command::Ls => {
            for b in service.list_boxes().await? {
                println!("{} {} {} {} {}", b.id, b.label, b.group, b.status, b.ip);
            }
        }
        Command::Fleet { name } => {
            for b in service.get_fleet(&name).await? {
                println!("{} {} {} {}", b.id, b.label, b.status, b.ip);
            }
        }
        Command::Get { name } => {
            let b = service.get_box(&name).await?;
            println!("{} {} {} {}", b.id, b.label, b.status, b.ip);
        }
        Command::Delete { name } => {
            let report = service.delete_fleet(&name).await?;
            for (b, _) in report.succeeded() {
                println!("deleted {} ({})", b.label, b.id);
            }
            return Ok(finish(&report));
        }
        Command::Run {
            name,
            command,
            port,
            username,
            password,
        } => {
            let creds = SshCredentials {
                port: port.unwrap_or(config.ssh.port),
                username: username.unwrap_or_else(|| config.ssh.username.clone()),
                password: password.or_else(|| config.ssh.password.clone()),
            };
            let report = service.run_command(&name, &command, &creds).await?;
            for (b, output) in report.succeeded() {
                for line in output.stdout_lossy().lines() {
                    println!("[{}] {line}", b.label);
                }
                for line in output.stderr_lossy().lines() {
                    eprintln!("[{}] {line}", b.label);
                }
            }
            return Ok(finish(&report));
        }
        Command::Images => {
            for image in service.list_images().await? {
                println!(
                    "{} {} {} {}",
                    image.id, image.name, image.status, image.size_gigabytes
                );
            }
        }
        Command::Snapshot { name, label } => {
            service.create_image(&name, &label).await?;
            println!("snapshot of {name} requested as {label}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Print failures and the summary; non-zero exit if anything failed.
fn finish<T, E: std::fmt::Display>(report: &BatchReport<T, E>) -> ExitCode {
    for (b, err) in report.failures() {
        eprintln!("{} ({}): {err}", b.label, b.ip);
    }
    eprintln!("{report}");
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
