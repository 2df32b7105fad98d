//! DC-net CLI
//!
//! Command-line tool for running DC-net rooms locally.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dcnet_core::{
    GroupParams, KeyStrategy, NodeIndex, RoomConfig,
    group::{DEFAULT_P_BITS, DEFAULT_Q_BITS},
    mpc::MemoryRelay,
    session::{SessionManager, SessionOptions, SessionReport},
    types::{DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_PAD_LENGTH},
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dcnet")]
#[command(about = "DC-net anonymous broadcast CLI", version)]
struct Cli {
    /// Log protocol rounds
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a whole room in this process and print every node's report
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// Message a node submits, as INDEX=TEXT (repeatable)
        #[arg(short, long = "send", value_parser = parse_send)]
        sends: Vec<(NodeIndex, String)>,

        /// Split collisions by the average instead of a coin flip
        #[arg(short, long)]
        deterministic: bool,

        /// Blinding key strategy (secret-sharing, diffie-hellman)
        #[arg(long, default_value = "secret-sharing")]
        strategy: KeyStrategy,

        /// Random padding bytes per message
        #[arg(long, default_value_t = DEFAULT_PAD_LENGTH)]
        pad_length: usize,

        /// Maximum message length in characters
        #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_LENGTH)]
        max_length: usize,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Subgroup order size in bits
        #[arg(long, default_value_t = DEFAULT_Q_BITS)]
        q_bits: u64,

        /// Modulus size in bits
        #[arg(long, default_value_t = DEFAULT_P_BITS)]
        p_bits: u64,

        /// Load the room from a JSON file instead of generating one
        #[arg(long)]
        room: Option<PathBuf>,

        /// Exchange commitments without verifying them
        #[arg(long)]
        no_verify: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Generate group parameters and print them as JSON
    Params {
        /// Subgroup order size in bits
        #[arg(long, default_value_t = DEFAULT_Q_BITS)]
        q_bits: u64,

        /// Modulus size in bits
        #[arg(long, default_value_t = DEFAULT_P_BITS)]
        p_bits: u64,
    },
}

fn parse_send(s: &str) -> std::result::Result<(NodeIndex, String), String> {
    let (index, text) = s
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=TEXT, got '{}'", s))?;
    let index = index
        .trim()
        .parse()
        .map_err(|e| format!("invalid node index '{}': {}", index, e))?;
    Ok((index, text.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match cli.command {
        Commands::Simulate {
            nodes,
            sends,
            deterministic,
            strategy,
            pad_length,
            max_length,
            seed,
            q_bits,
            p_bits,
            room,
            no_verify,
            format,
        } => {
            let room = match room {
                Some(path) => RoomConfig::from_file(&path)
                    .with_context(|| format!("loading room from {}", path.display()))?,
                None => {
                    info!(q_bits, p_bits, "Generating group parameters");
                    let group = GroupParams::generate(q_bits, p_bits, &mut rand::thread_rng())?;
                    let room = RoomConfig::local(nodes, group)
                        .with_pad_length(pad_length)
                        .with_max_message_length(max_length)
                        .with_non_probabilistic_mode(deterministic)
                        .with_key_strategy(strategy);
                    room.validate()?;
                    room
                }
            };

            let mut options = SessionOptions::new();
            if let Some(seed) = seed {
                options = options.with_seed(seed);
            }
            if no_verify {
                options = options.without_commitment_verification();
            }

            let reports = simulate(room, sends, options).await?;
            print_reports(&reports, &format)?;
        }
        Commands::Params { q_bits, p_bits } => {
            let group = GroupParams::generate(q_bits, p_bits, &mut rand::thread_rng())?;
            println!("{}", serde_json::to_string_pretty(&group)?);
        }
    }

    Ok(())
}

async fn simulate(
    room: RoomConfig,
    sends: Vec<(NodeIndex, String)>,
    options: SessionOptions,
) -> Result<Vec<SessionReport>> {
    let mut plaintexts = BTreeMap::new();
    for (index, text) in sends {
        room.check_index(index)?;
        if plaintexts.insert(index, text).is_some() {
            bail!("node {} can submit only one message per session", index);
        }
    }

    info!(
        room = %hex::encode(room.room_id),
        nodes = room.room_size,
        senders = plaintexts.len(),
        strategy = %room.key_strategy,
        "Running local room"
    );

    let room = Arc::new(room);
    let relay = Arc::new(MemoryRelay::new());

    let handles: Vec<_> = (1..=room.room_size)
        .map(|node| {
            let manager =
                SessionManager::new(Arc::clone(&room), node, Arc::clone(&relay), options);
            let plaintext = plaintexts.get(&node).cloned().unwrap_or_default();
            tokio::spawn(async move { manager?.run(&plaintext).await })
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await??);
    }
    Ok(reports)
}

fn print_reports(reports: &[SessionReport], format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(reports)?),
        "text" => {
            for report in reports {
                println!(
                    "\nNode {}: {} message(s) in {} real / {} virtual rounds, {} ms",
                    report.node,
                    report.resolved_count,
                    report.real_rounds_played,
                    report.virtual_rounds_played,
                    report.elapsed_ms
                );
                for message in &report.messages {
                    println!("  > {}", message);
                }
            }
        }
        other => bail!("unknown format '{}'", other),
    }
    Ok(())
}
