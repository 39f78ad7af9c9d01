//! Tipos compartilhados da corrida: lados, status de conexão e formatação.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

// ──────────────────────────────────────────────
// Lado
// ──────────────────────────────────────────────

/// Papel de um competidor. Uma corrida tem exatamente dois.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(rename = "policia")]
    Police,
    Taxi,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Police, Side::Taxi];

    /// Token usado no protocolo (`lado`).
    pub fn token(self) -> &'static str {
        match self {
            Side::Police => "policia",
            Side::Taxi => "taxi",
        }
    }

    /// Interpreta um token do protocolo, sem diferenciar maiúsculas.
    pub fn from_token(token: &str) -> Option<Side> {
        match token.trim().to_lowercase().as_str() {
            "policia" => Some(Side::Police),
            "taxi" => Some(Side::Taxi),
            _ => None,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::Police => Side::Taxi,
            Side::Taxi => Side::Police,
        }
    }

    /// Nome de exibição.
    pub fn label(self) -> &'static str {
        match self {
            Side::Police => "Polícia",
            Side::Taxi => "Táxi",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Um valor por lado.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerSide<T> {
    pub police: T,
    pub taxi: T,
}

impl<T> PerSide<T> {
    pub fn new(police: T, taxi: T) -> Self {
        Self { police, taxi }
    }

    pub fn from_fn(mut f: impl FnMut(Side) -> T) -> Self {
        Self {
            police: f(Side::Police),
            taxi: f(Side::Taxi),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Side, &T)> {
        [(Side::Police, &self.police), (Side::Taxi, &self.taxi)].into_iter()
    }
}

impl<T> Index<Side> for PerSide<T> {
    type Output = T;

    fn index(&self, side: Side) -> &T {
        match side {
            Side::Police => &self.police,
            Side::Taxi => &self.taxi,
        }
    }
}

impl<T> IndexMut<Side> for PerSide<T> {
    fn index_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Police => &mut self.police,
            Side::Taxi => &mut self.taxi,
        }
    }
}

// ──────────────────────────────────────────────
// Status de conexão
// ──────────────────────────────────────────────

/// Status de conexão de um lado.
///
/// Só avança: `NotConnected → Connecting → Connected`. `Error` é terminal
/// até o processo reiniciar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    /// Avança para `next` se isso não for um retrocesso. Retorna `true` se mudou.
    pub fn advance(&mut self, next: ConnectionStatus) -> bool {
        if *self == ConnectionStatus::Error || next <= *self {
            return false;
        }
        *self = next;
        true
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::NotConnected => "desconectado",
            ConnectionStatus::Connecting => "conectando",
            ConnectionStatus::Connected => "conectado",
            ConnectionStatus::Error => "erro",
        }
    }
}

// ──────────────────────────────────────────────
// Qualidade de sinal
// ──────────────────────────────────────────────

/// Qualidade que significa "desconectado/desconhecido".
pub const QUALITY_UNKNOWN: f64 = 200.0;

/// Nível de sinal derivado da qualidade (0 = melhor, 200 = sem sinal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalLevel {
    Strong,
    Degraded,
    Lost,
}

impl SignalLevel {
    pub fn from_quality(quality: f64) -> Self {
        let q = if quality.is_finite() {
            quality.clamp(0.0, QUALITY_UNKNOWN)
        } else {
            QUALITY_UNKNOWN
        };
        if q == 0.0 {
            SignalLevel::Strong
        } else if q < QUALITY_UNKNOWN {
            SignalLevel::Degraded
        } else {
            SignalLevel::Lost
        }
    }

    /// Número de barras exibidas (1–3).
    pub fn bars(self) -> u8 {
        match self {
            SignalLevel::Strong => 3,
            SignalLevel::Degraded => 2,
            SignalLevel::Lost => 1,
        }
    }
}

// ──────────────────────────────────────────────
// Formatação de tempo
// ──────────────────────────────────────────────

/// Relógio do topo da tela: `mm:ss`.
pub fn format_clock(ms: u64) -> String {
    let m = ms / 60_000;
    let s = (ms % 60_000) / 1000;
    format!("{m:02}:{s:02}")
}

/// Tempo final com centésimos: `mm:ss.cc`. Ausente vira `-:-`.
pub fn format_final(ms: Option<u64>) -> String {
    match ms {
        Some(ms) => {
            let c = (ms % 1000) / 10;
            format!("{}.{c:02}", format_clock(ms))
        }
        None => "-:-".into(),
    }
}
