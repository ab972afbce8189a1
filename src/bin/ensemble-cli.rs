//! Ensemble CLI - host a single agent over newline-delimited ACL frames
//!
//! Reads one JSON-encoded ACL message per line from stdin, routes each one
//! through the agent's event bus and echoes it to stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ensemble::runtime::message::{self, AclMessage};
use ensemble::runtime::role::NamedRole;
use ensemble::runtime::scheduler::ChainCursor;
use ensemble::runtime::transport::serve_lines;
use ensemble::runtime::{Agent, AgentConfig, Event, EventType, RoleRef};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "ensemble")]
#[command(about = "Agent execution and event-routing core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent fed from stdin
    Run {
        /// Agent configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Agent name (overrides the config file)
        #[arg(long)]
        name: Option<String>,

        /// Role to hold; may be repeated
        #[arg(long = "role")]
        roles: Vec<String>,

        /// How long to wait for queued events after stdin closes
        #[arg(long, default_value = "2000")]
        drain_timeout_ms: u64,
    },

    /// Decode frames from stdin and report the ones that fail
    Check,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            name,
            roles,
            drain_timeout_ms,
        } => {
            let mut config = match config {
                Some(path) => AgentConfig::load(&path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                None => AgentConfig::default(),
            };
            if let Some(name) = name {
                config.name = name;
            }
            run(config, roles, Duration::from_millis(drain_timeout_ms))?;
        }

        Commands::Check => check()?,
    }

    Ok(())
}

fn run(config: AgentConfig, roles: Vec<String>, drain_timeout: Duration) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build worker pool")?;

    let mut builder = Agent::builder(Arc::new(runtime.handle().clone()))
        .config(config)
        .on("echo", EventType::MessageReceived, echo_message)
        .on("roles", EventType::RoleActivated, |agent: &Agent, event: &Event| {
            if let Some(role) = event.role() {
                tracing::info!(agent = %agent.name(), role = %role.name(), "role active");
            }
            Ok(())
        });
    for role in roles {
        builder = builder.role(RoleRef::new(NamedRole::new(role)));
    }
    let agent = builder.build();

    agent.start()?;
    let stats = serve_lines(&agent, io::stdin().lock()).context("Failed to read stdin")?;

    let deadline = Instant::now() + drain_timeout;
    while !is_settled(&agent) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    agent.stop()?;

    eprintln!(
        "{} frames accepted, {} dropped, {} step faults",
        stats.accepted,
        stats.dropped,
        agent.step_faults().len()
    );
    Ok(())
}

fn echo_message(agent: &Agent, event: &Event) -> Result<()> {
    let message: &AclMessage = event
        .message()
        .context("MessageReceived event without a message")?;
    tracing::info!(
        agent = %agent.name(),
        performative = %message.performative,
        sender = %message.sender,
        conversation = %message.conversation_id,
        "message"
    );
    println!("{}", message::encode(message)?);
    Ok(())
}

fn is_settled(agent: &Agent) -> bool {
    agent.pending_events() == 0
        && matches!(
            agent.chain_cursor(),
            ChainCursor::Parked | ChainCursor::Halted | ChainCursor::Finished
        )
}

fn check() -> Result<()> {
    let mut failures = 0usize;
    for (index, line) in io::stdin().lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match message::decode(&line) {
            Ok(message) => println!(
                "{}: ok {} {} -> {}",
                index + 1,
                message.performative,
                message.sender,
                message.receiver
            ),
            Err(err) => {
                failures += 1;
                println!("{}: error {}", index + 1, err);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} frame(s) failed to decode");
    }
    Ok(())
}
