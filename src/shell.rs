//! Operator command shell.
//!
//! One command per line, read from any async reader; every command reports
//! success or failure and how long it took. A failing command never ends
//! the session.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Result;
use crate::node::ClusterNode;

pub const USAGE: &str = "Commands: PUT localfile sdfsname | GET sdfsname localfile | DEL sdfsname | STORE | LIST | MEM | LEAVE | FILE | QUIT";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Put { local: PathBuf, name: String },
    Get { name: String, local: PathBuf },
    Del { name: String },
    Store,
    List,
    Mem,
    Leave,
    File,
    Quit,
}

impl Command {
    /// Parse one input line; `Ok(None)` for a blank line
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((keyword, args)) = words.split_first() else {
            return Ok(None);
        };
        let command = match (keyword.to_ascii_uppercase().as_str(), args) {
            ("PUT", [local, name]) => Command::Put {
                local: PathBuf::from(local),
                name: name.to_string(),
            },
            ("GET", [name, local]) => Command::Get {
                name: name.to_string(),
                local: PathBuf::from(local),
            },
            ("DEL", [name]) => Command::Del {
                name: name.to_string(),
            },
            ("STORE", []) => Command::Store,
            ("LIST", []) => Command::List,
            ("MEM", []) => Command::Mem,
            ("LEAVE", []) => Command::Leave,
            ("FILE", []) => Command::File,
            ("QUIT", []) | ("EXIT", []) => Command::Quit,
            _ => return Err(format!("Unrecognized command {:?}. {}", line.trim(), USAGE)),
        };
        Ok(Some(command))
    }
}

pub struct Shell {
    node: Arc<ClusterNode>,
}

impl Shell {
    pub fn new(node: Arc<ClusterNode>) -> Self {
        Self { node }
    }

    /// Run one command and render its result as text
    pub async fn execute(&self, command: &Command) -> Result<String> {
        let storage = self.node.storage();
        let output = match command {
            Command::Put { local, name } => {
                let outcome = storage.put(local, name).await?;
                let mut text = format!("Stored {} on {}", name, join(&outcome.stored_at));
                for (owner, reason) in outcome.failed.iter() {
                    text.push_str(&format!("\nFailed on {}: {}", owner, reason));
                }
                text
            }
            Command::Get { name, local } => {
                let outcome = storage.get(name, local).await?;
                format!(
                    "Fetched {} ({} bytes) from {} into {}",
                    name,
                    outcome.bytes,
                    outcome.source,
                    local.display()
                )
            }
            Command::Del { name } => {
                let outcome = storage.delete(name).await?;
                let mut text = format!("Deleted {} from {}", name, join(&outcome.deleted_from));
                for (owner, reason) in outcome.failed.iter() {
                    text.push_str(&format!("\nFailed on {}: {}", owner, reason));
                }
                text
            }
            Command::Store => {
                let files = storage.local_files().await;
                if files.is_empty() {
                    "No files stored here".to_string()
                } else {
                    files.join("\n")
                }
            }
            Command::List => {
                let placements = storage.placements().await;
                if placements.is_empty() {
                    "No files in the cluster".to_string()
                } else {
                    placements
                        .iter()
                        .map(|(name, holders)| format!("{}: {}", name, join(holders)))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Mem => self
                .node
                .detector()
                .snapshot()
                .await
                .iter()
                .map(|m| {
                    format!(
                        "{:<32} {:>8} {} {}",
                        m.identity.to_string(),
                        m.heartbeat,
                        m.updated_at.format("%H:%M:%S%.3f"),
                        m.status
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Command::Leave | Command::Quit => {
                self.node.leave().await?;
                "Left the cluster".to_string()
            }
            Command::File => storage.ring_view().await.to_string(),
        };
        Ok(output)
    }

    /// Read commands until QUIT or end of input
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(usage) => {
                    output.write_all(format!("{}\n", usage).as_bytes()).await?;
                    continue;
                }
            };
            debug!("[{}] Shell command {:?}", self.node.address(), command);

            let started = Instant::now();
            let result = self.execute(&command).await;
            let elapsed = started.elapsed();
            let text = match result {
                Ok(text) => format!("{}\nOK ({:.3}s)\n", text, elapsed.as_secs_f64()),
                Err(e) => format!("FAILED: {} ({:.3}s)\n", e, elapsed.as_secs_f64()),
            };
            output.write_all(text.as_bytes()).await?;
            output.flush().await?;

            if command == Command::Quit {
                break;
            }
        }
        // End of input counts as QUIT; the node may already have left
        let _ = self.node.leave().await;
        self.node.stop();
        Ok(())
    }
}

fn join(addresses: &[std::net::SocketAddr]) -> String {
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
