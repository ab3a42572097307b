//! satviz - Clause stream consumer
//!
//! Accepts every producer that offers itself and logs its clause stream
//! until the producer terminates or the daemon is interrupted.

use satviz_protocol::{ClauseUpdate, SatAssignment, UpdateKind, VariableState};
use satviz_server::{Config, ConsumerConnection, ConsumerConnectionListener, ProducerId, ServerConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Logs one producer's stream.
#[derive(Default)]
struct StreamLogger {
    added: AtomicU64,
    removed: AtomicU64,
}

impl StreamLogger {
    fn summary(&self) -> String {
        format!(
            "{} added, {} removed",
            self.added.load(Ordering::Relaxed),
            self.removed.load(Ordering::Relaxed)
        )
    }
}

impl ConsumerConnectionListener for StreamLogger {
    fn on_clause_update(&self, producer: &ProducerId, update: &ClauseUpdate) {
        match update.kind {
            UpdateKind::Add => self.added.fetch_add(1, Ordering::Relaxed),
            UpdateKind::Remove => self.removed.fetch_add(1, Ordering::Relaxed),
        };
        tracing::debug!("[{}] {:?} {}", producer.id(), update.kind, update.clause);
    }

    fn on_terminate_solved(&self, producer: &ProducerId, assignment: &SatAssignment) {
        let set = assignment
            .iter()
            .filter(|(_, state)| *state == VariableState::Set)
            .count();
        tracing::info!(
            "[{}] SAT with {} of {} variables set ({})",
            producer.id(),
            set,
            assignment.var_count(),
            self.summary()
        );
    }

    fn on_terminate_refuted(&self, producer: &ProducerId) {
        tracing::info!("[{}] UNSAT ({})", producer.id(), self.summary());
    }

    fn on_terminate_otherwise(&self, producer: &ProducerId, reason: &str) {
        tracing::info!(
            "[{}] Terminated: {} ({})",
            producer.id(),
            reason,
            self.summary()
        );
    }
}

enum Control {
    Offered(ProducerId),
    Failed(String),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if SATVIZ_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            if std::env::var("SATVIZ_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting satviz consumer");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Poll timeout: {:?}", config.network.poll_timeout());

    let (control_tx, mut control) = mpsc::unbounded_channel();
    let fail_tx = control_tx.clone();
    let consumer = ConsumerConnection::new(
        ServerConfig::from(&config.network),
        move |pid| {
            let _ = control_tx.send(Control::Offered(pid));
        },
        move |reason| {
            let _ = fail_tx.send(Control::Failed(reason));
        },
    );
    consumer.start().await?;

    let shutdown_consumer = consumer.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping consumer...");
        shutdown_consumer.stop();
    });

    let mut failure = None;
    loop {
        tokio::select! {
            event = control.recv() => match event {
                Some(Control::Offered(pid)) => {
                    if consumer.connect(&pid, Arc::new(StreamLogger::default())).await {
                        tracing::info!("Streaming from {}", pid);
                    }
                }
                Some(Control::Failed(reason)) => {
                    failure = Some(reason);
                    break;
                }
                None => break,
            },
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                if !consumer.is_running() {
                    break;
                }
            }
        }
    }

    consumer.stop_and_wait().await;
    tracing::info!("Consumer stopped");

    match failure {
        Some(reason) => Err(reason.into()),
        None => Ok(()),
    }
}
