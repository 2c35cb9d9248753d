//! `orchestra` - investigation gateway process

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use orchestra_core::gateway::InvestigateRequest;
use orchestra_core::{Gateway, GatewayServer, IdentityHasher, OperationId, OrchestraConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,orchestra_core=debug";

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(value_parser!(PathBuf))
        .help("Path to orchestra.toml")
}

fn cli() -> Command {
    Command::new("orchestra")
        .version(orchestra_core::VERSION)
        .about("Investigation orchestration and correlation gateway")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("serve")
                .about("Serve investigation requests")
                .arg(config_arg())
                .arg(
                    Arg::new("json-logs")
                        .long("json-logs")
                        .action(ArgAction::SetTrue)
                        .help("Emit logs as JSON lines"),
                ),
        )
        .subcommand(
            Command::new("investigate")
                .about("Run one investigation in-process and print the report")
                .arg(Arg::new("target").required(true).help("Target identifier"))
                .arg(config_arg())
                .arg(
                    Arg::new("operation-id")
                        .long("operation-id")
                        .help("Use this operation id instead of generating one"),
                ),
        )
        .subcommand(
            Command::new("hash")
                .about("Print the handle for a target")
                .arg(Arg::new("target").required(true).help("Target identifier"))
                .arg(config_arg()),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<OrchestraConfig> {
    let path = args.get_one::<PathBuf>("config");
    OrchestraConfig::load(path.map(PathBuf::as_path)).context("failed to load configuration")
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("missing argument '{name}'"))
}

async fn serve(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let gateway = Arc::new(Gateway::from_config(&config).context("failed to build gateway")?);
    let server = GatewayServer::bind(&config.gateway.bind, gateway, config.gateway.max_frame_bytes)
        .await
        .with_context(|| format!("failed to bind {}", config.gateway.bind))?;

    tracing::info!(version = orchestra_core::VERSION, bind = %config.gateway.bind, "orchestra starting");
    server
        .serve_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    tracing::info!("orchestra stopped");
    Ok(())
}

async fn investigate(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let gateway = Gateway::from_config(&config).context("failed to build gateway")?;

    let mut request = InvestigateRequest::new(required(args, "target")?.as_str());
    if let Some(id) = args.get_one::<String>("operation-id") {
        request = request.with_operation_id(OperationId::parse(id)?);
    }

    match gateway.investigate(request).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err((err, _)) => Err(err).context("investigation failed"),
    }
}

fn hash(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let hasher = IdentityHasher::with_salt(&config.opsec.salt);
    println!("{}", hasher.hash(required(args, "target")?));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("serve", args)) => {
            init_tracing(args.get_flag("json-logs"));
            serve(args).await
        }
        Some(("investigate", args)) => {
            init_tracing(false);
            investigate(args).await
        }
        Some(("hash", args)) => hash(args),
        _ => anyhow::bail!("unknown subcommand"),
    }
}
