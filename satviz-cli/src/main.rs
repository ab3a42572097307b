//! satviz-cli - Command-line producer for satviz
//!
//! Offers itself to a consumer, streams the clause updates given on the
//! command line once started, then terminates.

mod input;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use satviz_client::{ConnectionConfig, ProducerConnection, ProducerConnectionListener};
use satviz_protocol::{Blueprint, ClauseUpdate, Encoder, Message, Offer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "satviz-cli")]
#[command(about = "Command-line producer for the satviz clause stream")]
#[command(version)]
struct Cli {
    /// Consumer address
    #[arg(short, long, default_value = "127.0.0.1:34312", env = "SATVIZ_SERVER")]
    server: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, wait for START and stream clause updates
    Produce(ProduceArgs),

    /// Print the wire bytes of a clause update
    Encode {
        /// Literals, e.g. "1 -2 3"
        clause: String,

        /// Encode as removal
        #[arg(long)]
        remove: bool,
    },
}

#[derive(Args)]
struct ProduceArgs {
    /// Offer as a proof instead of a solver
    #[arg(long, conflicts_with_all = ["name", "hash", "delayed"])]
    proof: bool,

    /// Solver name
    #[arg(short, long, default_value = "satviz-cli")]
    name: String,

    /// Instance hash
    #[arg(long, default_value = "0")]
    hash: u64,

    /// Announce the solver as delayed
    #[arg(long)]
    delayed: bool,

    /// Clause to add (repeatable), e.g. --add "1 -2 3"
    #[arg(short, long)]
    add: Vec<String>,

    /// Clause to remove (repeatable), sent after all additions
    #[arg(short, long)]
    remove: Vec<String>,

    /// Terminate as satisfiable with this model, e.g. --solved "1 -2 3"
    #[arg(long, conflicts_with_all = ["refuted", "failed"])]
    solved: Option<String>,

    /// Variable count of the model (defaults to the largest variable)
    #[arg(long, requires = "solved")]
    vars: Option<usize>,

    /// Terminate as unsatisfiable
    #[arg(long, conflicts_with = "failed")]
    refuted: bool,

    /// Terminate with a failure reason
    #[arg(long)]
    failed: Option<String>,

    /// Milliseconds between connect attempts
    #[arg(long, default_value = "1000")]
    retry_ms: u64,
}

enum Outcome {
    Started,
    Stopped(String),
}

struct Notifier(mpsc::UnboundedSender<Outcome>);

impl ProducerConnectionListener for Notifier {
    fn on_connect(&self) {
        let _ = self.0.send(Outcome::Started);
    }

    fn on_disconnect(&self, reason: &str) {
        let _ = self.0.send(Outcome::Stopped(reason.to_string()));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { clause, remove } => {
            let clause = input::parse_clause(&clause)?;
            let update = if remove {
                ClauseUpdate::remove(clause)
            } else {
                ClauseUpdate::add(clause)
            };
            let frame = Encoder::encode_message(&Blueprint::satviz(), &Message::clause_update(update))?;
            let hex: Vec<String> = frame.iter().map(|b| format!("{:02x}", b)).collect();
            println!("{}", hex.join(" "));
        }
        Commands::Produce(args) => {
            if let Err(e) = produce(cli.server, args).await {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn produce(server: SocketAddr, args: ProduceArgs) -> Result<(), String> {
    let mut updates = Vec::new();
    for text in &args.add {
        updates.push(ClauseUpdate::add(input::parse_clause(text)?));
    }
    for text in &args.remove {
        updates.push(ClauseUpdate::remove(input::parse_clause(text)?));
    }
    let assignment = args
        .solved
        .as_deref()
        .map(|text| input::parse_assignment(text, args.vars))
        .transpose()?;

    let offer = if args.proof {
        Offer::Proof
    } else {
        Offer::solver(args.name, args.delayed, args.hash)
    };
    let config =
        ConnectionConfig::new(server).with_retry_interval(Duration::from_millis(args.retry_ms));
    let producer = ProducerConnection::new(config, offer);

    let (tx, mut outcomes) = mpsc::unbounded_channel();
    producer
        .establish(Arc::new(Notifier(tx)))
        .map_err(|e| e.to_string())?;
    eprintln!("{} {}", "Offering to".green(), server.to_string().cyan());
    eprintln!("{}", "Press Ctrl+C to give up...".dimmed());

    let started = tokio::select! {
        outcome = outcomes.recv() => outcome,
        _ = tokio::signal::ctrl_c() => None,
    };
    match started {
        Some(Outcome::Started) => eprintln!("{}", "Started".green()),
        Some(Outcome::Stopped(reason)) => {
            return Err(format!("consumer declined: {}", reason));
        }
        None => {
            producer.close_and_wait().await;
            return Err("cancelled before START".to_string());
        }
    }

    for update in &updates {
        if !producer.send_clause_update(update).await {
            let reason = match outcomes.try_recv() {
                Ok(Outcome::Stopped(reason)) => reason,
                _ => "connection closed".to_string(),
            };
            return Err(format!("stream stopped: {}", reason));
        }
        println!("{} {:?} {}", "sent".dimmed(), update.kind, update.clause);
    }

    let terminated = if let Some(assignment) = &assignment {
        producer.terminate_solved(assignment).await
    } else if args.refuted {
        producer.terminate_refuted().await
    } else if let Some(reason) = &args.failed {
        producer.terminate_otherwise(reason).await
    } else {
        producer.close_and_wait().await;
        eprintln!("{}", "Closed without a result".yellow());
        return Ok(());
    };

    if !terminated {
        return Err("could not send terminal message".to_string());
    }
    producer.close_and_wait().await;
    eprintln!("{}", "Terminated".green());
    Ok(())
}
