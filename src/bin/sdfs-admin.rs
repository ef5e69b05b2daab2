use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "sdfs-admin")]
#[command(about = "Inspect running sdfs nodes through their status API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check health of cluster nodes
    Health {
        /// Status API addresses (e.g., "127.0.0.1:2336,127.0.0.1:2346")
        #[arg(long)]
        nodes: String,
    },
    /// Print one node's membership table
    Members {
        /// Status API address of the node
        #[arg(long)]
        node: SocketAddr,
    },
    /// Print where every file is stored, as one node sees it
    Files {
        /// Status API address of the node
        #[arg(long)]
        node: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Health { nodes } => check_cluster_health(&client, &nodes).await?,
        Commands::Members { node } => show_members(&client, node).await?,
        Commands::Files { node } => show_files(&client, node).await?,
    }

    Ok(())
}

async fn check_cluster_health(client: &Client, nodes: &str) -> anyhow::Result<()> {
    let node_addrs = parse_nodes(nodes)?;
    println!("Checking {} nodes...", node_addrs.len());

    for node in &node_addrs {
        let health_url = format!("http://{}/health", node);
        match client.get(&health_url).send().await {
            Ok(response) if response.status().is_success() => {
                let body = response.text().await.unwrap_or_default();
                println!("✅ Node {}: {}", node, body.trim());
            }
            Ok(response) => {
                println!("❌ Node {}: HTTP {}", node, response.status());
            }
            Err(e) => {
                println!("❌ Node {}: unreachable ({})", node, e);
            }
        }
    }

    Ok(())
}

async fn fetch(client: &Client, node: SocketAddr, path: &str) -> anyhow::Result<Value> {
    let url = format!("http://{}{}", node, path);
    let response = client.get(&url).send().await?.error_for_status()?;
    Ok(response.json::<Value>().await?)
}

async fn show_members(client: &Client, node: SocketAddr) -> anyhow::Result<()> {
    let members = fetch(client, node, "/members").await?;
    for member in members.as_array().into_iter().flatten() {
        println!(
            "{}#{} heartbeat={} status={} updated={}",
            member["identity"]["address"].as_str().unwrap_or("?"),
            member["identity"]["epoch"],
            member["heartbeat"],
            member["status"].as_str().unwrap_or("?"),
            member["updated_at"].as_str().unwrap_or("?"),
        );
    }
    Ok(())
}

async fn show_files(client: &Client, node: SocketAddr) -> anyhow::Result<()> {
    let files = fetch(client, node, "/files").await?;
    match files.as_object() {
        Some(placements) if !placements.is_empty() => {
            for (name, holders) in placements {
                let holders: Vec<&str> = holders
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .collect();
                println!("{}: {}", name, holders.join(", "));
            }
        }
        _ => println!("No files in the cluster"),
    }
    Ok(())
}

fn parse_nodes(nodes: &str) -> anyhow::Result<Vec<SocketAddr>> {
    nodes
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nodes() {
        let parsed = parse_nodes("127.0.0.1:2336, 127.0.0.1:2346,").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1], "127.0.0.1:2346".parse().unwrap());
    }

    #[test]
    fn test_parse_nodes_rejects_garbage() {
        assert!(parse_nodes("127.0.0.1:2336,nonsense").is_err());
    }
}
