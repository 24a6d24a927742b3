//! panama - 审计集群控制面
//!
//! - `panama leader`：运行 Controller 与操作台
//! - `panama follower --controller HOST:PORT`：运行 Agent

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use panama::config::parse_timeout_secs;
use panama::leader::console;
use panama::{AgentSession, CommandAudit, Controller, FollowerConfig, LeaderConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "panama", version, about = "Start and stop host auditing across a fleet")]
struct Cli {
    /// Log protocol traffic
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the controller with an interactive prompt
    Leader {
        /// Control channel listen address
        #[arg(long)]
        control: Option<String>,
        /// Broadcast channel listen address
        #[arg(long)]
        broadcast: Option<String>,
        /// Broadcast address handed to agents (defaults to the bound address)
        #[arg(long)]
        advertise: Option<String>,
        /// Directory for collected audit logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Run an agent
    Follower {
        /// Controller control channel address (host:port)
        #[arg(short, long)]
        controller: Option<String>,
        /// Seconds to wait for each controller reply (waits forever when unset)
        #[arg(long)]
        request_timeout: Option<String>,
        /// Audit log written by the audit subsystem
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let directive = if cli.verbose { "panama=debug" } else { "panama=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    tracing::info!("🚀 panama v{}", env!("CARGO_PKG_VERSION"));

    match cli.role {
        Role::Leader {
            control,
            broadcast,
            advertise,
            log_dir,
        } => {
            let mut config = LeaderConfig::from_env();
            if let Some(addr) = control {
                config.control_addr = addr;
            }
            if let Some(addr) = broadcast {
                config.broadcast_addr = addr;
            }
            if advertise.is_some() {
                config.advertise_broadcast = advertise;
            }
            if let Some(dir) = log_dir {
                config.log_dir = dir;
            }
            run_leader(config).await
        }
        Role::Follower {
            controller,
            request_timeout,
            audit_log,
        } => {
            let mut config = FollowerConfig::from_env()?;
            if let Some(addr) = controller {
                config.controller_addr = addr;
            }
            if let Some(secs) = request_timeout {
                config.request_timeout = Some(parse_timeout_secs(&secs)?);
            }
            if let Some(path) = audit_log {
                config.audit.log_path = path;
            }
            run_follower(config).await
        }
    }
}

async fn run_leader(config: LeaderConfig) -> Result<()> {
    let controller = Controller::bind(config).await?;

    let mut server = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    let stdin = console::stdin_lines()?;
    tokio::select! {
        result = console::run_lines(&controller, stdin, tokio::io::stdout()) => {
            result?;
            server.await??;
        }
        // Ctrl-C 时服务先退出
        result = &mut server => {
            result??;
        }
    }
    Ok(())
}

async fn run_follower(config: FollowerConfig) -> Result<()> {
    let audit = Arc::new(CommandAudit::new(&config.audit));
    let mut session = AgentSession::register(config, audit).await?;
    session.reaction_loop().await?;
    Ok(())
}
