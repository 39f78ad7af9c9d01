//! # MindRace Core
//!
//! Crate compartilhada com o protocolo dos dispositivos, o estado da
//! corrida, o ranking e a configuração TOML do MindRace.
//!
//! ## Módulos
//! - [`types`] – Lados, status de conexão, qualidade de sinal, formatação
//! - [`protocol`] – Framing por linha e decodificação JSON
//! - [`competitor`] – Estado de cada competidor e regra de relaxamento
//! - [`race`] – Relógio, término automático/manual e vencedor
//! - [`links`] – Controle dos links seriais (lado, buffer, pareamento)
//! - [`ranking`] – Jogadores e armazenamento do ranking
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod competitor;
pub mod race;
pub mod links;
pub mod ranking;
pub mod config;

// Re-exports convenientes
pub use types::{ConnectionStatus, PerSide, Side};
pub use competitor::{CompetitorState, TelemetryUpdate};
pub use race::{RaceOutcome, RaceSession, Winner};
pub use links::{LinkId, LinkManager};
pub use config::AppConfig;
