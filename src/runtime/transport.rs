//! Transport seam: outbound delivery and newline-delimited intake
//!
//! The network pipeline itself lives outside this crate. Agents only need
//! something that ships encoded text (`Transport`) and something that cuts an
//! inbound byte stream into frames and feeds them to `Agent::receive_message`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use super::agent::Agent;

/// Outbound side of a network transport
pub trait Transport: Send + Sync {
    /// Ship one encoded message frame to `receiver`
    fn send(&self, receiver: &str, text: String) -> anyhow::Result<()>;
}

/// One outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Receiving agent name
    pub receiver: String,
    /// Encoded message
    pub text: String,
}

/// Transport that hands frames to an in-process channel
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    /// Create the transport and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, receiver: &str, text: String) -> anyhow::Result<()> {
        self.tx
            .send(Outbound {
                receiver: receiver.to_string(),
                text,
            })
            .map_err(|_| anyhow::anyhow!("transport channel closed"))
    }
}

/// Transport delivering frames to agents in the same process, by name
#[derive(Default)]
pub struct LocalRouter {
    agents: RwLock<HashMap<String, Weak<Agent>>>,
}

impl LocalRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `agent` reachable under its configured name
    pub fn register(&self, agent: &Arc<Agent>) {
        self.agents
            .write()
            .insert(agent.name().to_string(), Arc::downgrade(agent));
    }

    /// Forget an agent name
    pub fn unregister(&self, name: &str) -> bool {
        self.agents.write().remove(name).is_some()
    }
}

impl Transport for LocalRouter {
    fn send(&self, receiver: &str, text: String) -> anyhow::Result<()> {
        let agent = self
            .agents
            .read()
            .get(receiver)
            .and_then(Weak::upgrade)
            .ok_or_else(|| anyhow::anyhow!("no local agent named '{receiver}'"))?;
        agent.receive_message(&text)?;
        Ok(())
    }
}

/// Frame counts from `serve_lines`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntakeStats {
    /// Frames decoded and queued
    pub accepted: usize,
    /// Frames dropped because they did not decode or were refused
    pub dropped: usize,
}

/// Feed newline-delimited frames from `reader` to an agent until EOF.
///
/// Blank lines are skipped. A frame that fails is logged and dropped; it is
/// never retried. Only reader IO errors end the intake early.
pub fn serve_lines<R: BufRead>(agent: &Agent, reader: R) -> io::Result<IntakeStats> {
    let mut stats = IntakeStats::default();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match agent.receive_message(&line) {
            Ok(()) => stats.accepted += 1,
            Err(err) => {
                tracing::warn!(agent = %agent.id(), "frame dropped: {err}");
                stats.dropped += 1;
            }
        }
    }

    tracing::debug!(
        agent = %agent.id(),
        accepted = stats.accepted,
        dropped = stats.dropped,
        "intake finished"
    );
    Ok(stats)
}
