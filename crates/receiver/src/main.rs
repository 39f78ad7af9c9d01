//! # MindRace Receiver
//!
//! Recebe a telemetria dos dois headsets pelas portas seriais e conduz a
//! corrida Polícia × Táxi: relógio, bloqueio por relaxamento, término e
//! ranking.
//!
//! ## Uso
//! ```bash
//! mindrace_receiver            # reabre as portas do config.toml e pareia as que faltam
//! RUST_LOG=debug mindrace_receiver
//! ```
//!
//! Os comandos do terminal estão em [`console::HELP`].

mod console;
mod engine;
mod ports;
mod serial_thread;

use crossbeam_channel::RecvTimeoutError;
use engine::Command;
use mindrace_core::config::AppConfig;
use mindrace_core::ranking::{JsonFileRanking, RankingStore};
use mindrace_core::types::format_final;
use ports::SerialPortProvider;
use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for e in config.validate() {
        warn!("Config: {e}");
    }

    // ── Ranking ──
    let ranking = JsonFileRanking::new(config.ranking_path());
    match ranking.top(config.ranking.top_n) {
        Ok(top) if !top.is_empty() => {
            info!("Ranking atual:");
            for (i, entry) in top.iter().enumerate() {
                info!(
                    "  {:>2}. {:<24} {} ({})",
                    i + 1,
                    entry.display_name(),
                    format_final(Some(entry.time_ms)),
                    entry.side.label()
                );
            }
        }
        Ok(_) => info!("Ranking vazio"),
        Err(e) => warn!("Ranking indisponível: {e}"),
    }

    // ── Motor da corrida ──
    let provider = Arc::new(SerialPortProvider::new(config.serial.clone()));
    let baud = config.serial.baud_rate;
    let ranking_file = config.ranking_path();
    let handle = match engine::spawn_engine(config, provider, Box::new(ranking)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Falha ao iniciar o motor da corrida: {e}");
            return;
        }
    };
    handle.send(Command::ReopenAuthorized);
    handle.send(Command::PairMissing);

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🏁 MINDRACE – POLÍCIA × TÁXI");
    println!("══════════════════════════════════════════════");
    println!("  Serial:  {baud} baud");
    println!("  Ranking: {}", ranking_file.display());
    println!("══════════════════════════════════════════════");
    println!("{}", console::HELP);
    println!();

    // ── Comandos do terminal ──
    let commands = handle.commands();
    let stdin_thread = std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if line.trim() == "ajuda" {
                    println!("{}", console::HELP);
                    continue;
                }
                match console::parse_command(&line) {
                    Some(cmd) => {
                        let quit = cmd == Command::Shutdown;
                        if commands.send(cmd).is_err() || quit {
                            return;
                        }
                    }
                    None => println!("Comando desconhecido: {} (digite 'ajuda')", line.trim()),
                }
            }
            // stdin fechado
            let _ = commands.send(Command::Shutdown);
        });
    if let Err(e) = stdin_thread {
        warn!("Terminal indisponível, sem comandos: {e}");
    }

    // ── Loop de status ──
    let mut last_status = Instant::now();
    loop {
        match handle.snapshots.recv_timeout(STATUS_INTERVAL) {
            Ok(snap) => {
                if last_status.elapsed() >= STATUS_INTERVAL {
                    info!("{}", console::status_line(&snap));
                    if let Ok(json) = serde_json::to_string(&snap) {
                        debug!("snapshot {json}");
                    }
                    last_status = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    handle.join();
    info!("Encerrado");
}
