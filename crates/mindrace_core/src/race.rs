//! Relógio da corrida e arbitragem do vencedor.
//!
//! [`RaceSession`] é o agregado de uma instância de corrida: relógio, os
//! dois competidores, status de conexão e resultado. Quem o possui é o único
//! que o altera, então a checagem de término sempre vê os dois lados no
//! mesmo estado.

use crate::competitor::{ApplyEffect, CompetitorState, TelemetryUpdate};
use crate::protocol::{Decoded, Message};
use crate::types::{ConnectionStatus, PerSide, QUALITY_UNKNOWN, Side};
use serde::Serialize;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Erros de controle da corrida.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RaceError {
    #[error("Conecte pelo menos {required} dispositivo(s) ({connected} conectado(s))")]
    NotEnoughConnected { connected: usize, required: usize },
}

// ──────────────────────────────────────────────
// Relógio
// ──────────────────────────────────────────────

/// Relógio da corrida.
///
/// Só pode ser iniciado uma vez por instância. `start` e `stop` repetidos
/// não têm efeito.
#[derive(Debug, Clone, Default)]
pub struct RaceClock {
    started_at: Option<Instant>,
    start_epoch_ms: Option<u64>,
    elapsed_ms: u64,
    running: bool,
}

impl RaceClock {
    pub fn start(&mut self, now: Instant) -> bool {
        if self.started_at.is_some() {
            return false;
        }
        self.started_at = Some(now);
        self.start_epoch_ms = Some(epoch_ms());
        self.elapsed_ms = 0;
        self.running = true;
        true
    }

    pub fn stop(&mut self, now: Instant) -> bool {
        if !self.running {
            return false;
        }
        self.tick(now);
        self.running = false;
        true
    }

    /// Atualiza o tempo decorrido. Sem efeito com o relógio parado.
    pub fn tick(&mut self, now: Instant) -> u64 {
        if let (true, Some(start)) = (self.running, self.started_at) {
            self.elapsed_ms = now.saturating_duration_since(start).as_millis() as u64;
        }
        self.elapsed_ms
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn start_epoch_ms(&self) -> Option<u64> {
        self.start_epoch_ms
    }

    /// Valor do relógio se estiver correndo.
    pub fn running_elapsed(&self) -> Option<u64> {
        self.running.then_some(self.elapsed_ms)
    }
}

/// Milissegundos desde a época Unix.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ──────────────────────────────────────────────
// Resultado
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Winner {
    Side(Side),
    Tie,
}

/// Critério usado para decidir o vencedor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeReason {
    /// Término automático: menor tempo final.
    FinishTime,
    /// Finalização manual: mais voltas.
    LapCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RaceOutcome {
    pub winner: Winner,
    pub reason: OutcomeReason,
}

impl RaceOutcome {
    /// Texto exibido junto com o vencedor.
    pub fn reason_text(&self) -> &'static str {
        match (self.reason, self.winner) {
            (OutcomeReason::FinishTime, Winner::Tie) => "Tempos iguais.",
            (OutcomeReason::FinishTime, _) => "Menor tempo final.",
            (OutcomeReason::LapCount, Winner::Tie) => "Mesmas voltas.",
            (OutcomeReason::LapCount, _) => "Mais voltas.",
        }
    }
}

/// Vencedor por tempo final. `None` se algum lado não tem tempo final.
pub fn outcome_by_finish_time(competitors: &PerSide<CompetitorState>) -> Option<RaceOutcome> {
    let police = competitors.police.finish_ms?;
    let taxi = competitors.taxi.finish_ms?;
    let winner = match police.cmp(&taxi) {
        std::cmp::Ordering::Less => Winner::Side(Side::Police),
        std::cmp::Ordering::Greater => Winner::Side(Side::Taxi),
        std::cmp::Ordering::Equal => Winner::Tie,
    };
    Some(RaceOutcome {
        winner,
        reason: OutcomeReason::FinishTime,
    })
}

/// Vencedor por voltas completadas. Não olha o tempo.
pub fn outcome_by_laps(competitors: &PerSide<CompetitorState>) -> RaceOutcome {
    let winner = match competitors.police.laps.cmp(&competitors.taxi.laps) {
        std::cmp::Ordering::Greater => Winner::Side(Side::Police),
        std::cmp::Ordering::Less => Winner::Side(Side::Taxi),
        std::cmp::Ordering::Equal => Winner::Tie,
    };
    RaceOutcome {
        winner,
        reason: OutcomeReason::LapCount,
    }
}

// ──────────────────────────────────────────────
// Sessão
// ──────────────────────────────────────────────

/// Agregado de uma instância de corrida.
#[derive(Debug, Clone, Default)]
pub struct RaceSession {
    pub clock: RaceClock,
    pub competitors: PerSide<CompetitorState>,
    pub connection: PerSide<ConnectionStatus>,
    pub outcome: Option<RaceOutcome>,
}

impl RaceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Volta todo o estado da corrida ao inicial.
    pub fn reset(&mut self) {
        *self = Self::default();
        info!("Nova corrida armada");
    }

    pub fn connected_count(&self) -> usize {
        self.connection
            .iter()
            .filter(|(_, s)| **s == ConnectionStatus::Connected)
            .count()
    }

    /// Qualidade mais recente do lado (0–200).
    pub fn quality(&self, side: Side) -> f64 {
        self.competitors[side].quality
    }

    /// Marca "conectando" os lados ainda desconectados.
    pub fn mark_connecting(&mut self) {
        for side in Side::ALL {
            self.connection[side].advance(ConnectionStatus::Connecting);
        }
    }

    /// Sem suporte a serial: os dois lados ficam em erro.
    pub fn mark_transport_missing(&mut self) {
        for side in Side::ALL {
            self.connection[side] = ConnectionStatus::Error;
        }
    }

    /// Inicia o relógio se houver dispositivos conectados suficientes.
    pub fn start(&mut self, now: Instant, min_connected: usize) -> Result<bool, RaceError> {
        let connected = self.connected_count();
        if connected < min_connected {
            return Err(RaceError::NotEnoughConnected {
                connected,
                required: min_connected,
            });
        }
        let started = self.clock.start(now);
        if started {
            info!("Corrida iniciada ({connected} conectado(s))");
        }
        Ok(started)
    }

    /// Aplica uma mensagem decodificada ao lado correspondente.
    pub fn apply_message(&mut self, decoded: &Decoded, now: Instant) -> Option<ApplyEffect> {
        match &decoded.message {
            Message::Blink => {
                self.competitors[decoded.side].blink(now);
                None
            }
            Message::Telemetry(update) => Some(self.apply_telemetry(decoded.side, update, now)),
        }
    }

    /// Aplica telemetria lendo o relógio no instante da aplicação.
    pub fn apply_telemetry(
        &mut self,
        side: Side,
        update: &TelemetryUpdate,
        now: Instant,
    ) -> ApplyEffect {
        self.clock.tick(now);
        let elapsed = self.clock.running_elapsed();
        let competitor = &mut self.competitors[side];
        let effect = competitor.apply(update, elapsed, now);

        let q = competitor.quality;
        if q.is_finite()
            && q < QUALITY_UNKNOWN
            && self.connection[side].advance(ConnectionStatus::Connected)
        {
            info!("{} conectado (qualidade {q:.0})", side.label());
        }

        match (effect.gated_before, effect.gated_after) {
            (false, true) => info!("{}: concentração zerou, aguardando relaxamento", side.label()),
            (true, false) => info!("{}: relaxamento atingido, voltas liberadas", side.label()),
            _ => {}
        }
        if let Some(ms) = effect.finished_at {
            info!("{} completou a corrida em {ms} ms", side.label());
        }

        self.check_completion(now);
        effect
    }

    /// Checagem periódica: atualiza o relógio, registra tempos finais
    /// pendentes e verifica o término automático.
    pub fn tick(&mut self, now: Instant) -> Option<RaceOutcome> {
        self.clock.tick(now);
        let elapsed = self.clock.running_elapsed();
        for side in Side::ALL {
            if let Some(ms) = self.competitors[side].check_finish(elapsed) {
                info!("{} completou a corrida em {ms} ms", side.label());
            }
        }
        self.check_completion(now)
    }

    /// Término automático: os dois lados completaram. Dispara uma vez.
    pub fn check_completion(&mut self, now: Instant) -> Option<RaceOutcome> {
        if !self.clock.is_running() || self.outcome.is_some() {
            return None;
        }
        if !(self.competitors.police.is_done() && self.competitors.taxi.is_done()) {
            return None;
        }
        self.clock.stop(now);
        let outcome = outcome_by_finish_time(&self.competitors)?;
        info!("Corrida finalizada: {:?} ({})", outcome.winner, outcome.reason_text());
        self.outcome = Some(outcome);
        Some(outcome)
    }

    /// Finalização manual: para o relógio e decide por voltas. `None` se a
    /// corrida ainda não começou.
    pub fn finalize_manually(&mut self, now: Instant) -> Option<RaceOutcome> {
        if !self.clock.has_started() {
            warn!("Finalização ignorada: corrida não iniciada");
            return None;
        }
        self.clock.stop(now);
        if let Some(outcome) = self.outcome {
            warn!("Corrida já tinha resultado, mantendo {:?}", outcome.winner);
            return Some(outcome);
        }
        let outcome = outcome_by_laps(&self.competitors);
        info!(
            "Corrida finalizada manualmente: {:?} ({})",
            outcome.winner,
            outcome.reason_text()
        );
        self.outcome = Some(outcome);
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn laps(n: f64) -> TelemetryUpdate {
        TelemetryUpdate {
            laps: Some(n),
            concentration: Some(60.0),
            quality: Some(0.0),
            ..Default::default()
        }
    }

    fn running_session(t0: Instant) -> RaceSession {
        let mut s = RaceSession::new();
        s.apply_telemetry(Side::Police, &laps(0.0), t0);
        s.apply_telemetry(Side::Taxi, &laps(0.0), t0);
        assert_eq!(s.start(t0, 1), Ok(true));
        s
    }

    #[test]
    fn clock_start_and_stop_are_idempotent() {
        let t0 = Instant::now();
        let mut clock = RaceClock::default();
        assert!(clock.start(t0));
        assert!(!clock.start(t0 + Duration::from_millis(50)));
        assert_eq!(clock.tick(t0 + Duration::from_millis(90)), 90);

        assert!(clock.stop(t0 + Duration::from_millis(100)));
        assert!(!clock.stop(t0 + Duration::from_millis(500)));
        assert_eq!(clock.elapsed_ms(), 100);
        assert_eq!(clock.tick(t0 + Duration::from_millis(900)), 100);

        // Parado não recomeça na mesma instância.
        assert!(!clock.start(t0 + Duration::from_millis(1000)));
        assert!(!clock.is_running());
    }

    #[test]
    fn start_requires_a_connected_side() {
        let mut s = RaceSession::new();
        let t0 = Instant::now();
        assert_eq!(
            s.start(t0, 1),
            Err(RaceError::NotEnoughConnected {
                connected: 0,
                required: 1
            })
        );
        s.apply_telemetry(
            Side::Taxi,
            &TelemetryUpdate {
                quality: Some(120.0),
                ..Default::default()
            },
            t0,
        );
        assert_eq!(s.connection.taxi, ConnectionStatus::Connected);
        assert_eq!(s.connection.police, ConnectionStatus::NotConnected);
        assert_eq!(s.start(t0, 1), Ok(true));
        assert_eq!(s.start(t0, 1), Ok(false));
    }

    #[test]
    fn unknown_quality_does_not_connect() {
        let mut s = RaceSession::new();
        s.apply_telemetry(
            Side::Police,
            &TelemetryUpdate {
                quality: Some(200.0),
                boost: Some(3.0),
                ..Default::default()
            },
            Instant::now(),
        );
        assert_eq!(s.connection.police, ConnectionStatus::NotConnected);
        assert_eq!(s.quality(Side::Police), 200.0);
    }

    #[test]
    fn faster_finish_wins() {
        let t0 = Instant::now();
        let mut s = running_session(t0);
        s.apply_telemetry(Side::Police, &laps(10.0), t0 + Duration::from_millis(12_340));
        assert!(s.outcome.is_none());
        assert!(s.clock.is_running());
        s.apply_telemetry(Side::Taxi, &laps(10.0), t0 + Duration::from_millis(12_341));

        assert_eq!(
            s.outcome,
            Some(RaceOutcome {
                winner: Winner::Side(Side::Police),
                reason: OutcomeReason::FinishTime,
            })
        );
        assert!(!s.clock.is_running());
        assert_eq!(s.competitors.police.finish_ms, Some(12_340));
        assert_eq!(s.competitors.taxi.finish_ms, Some(12_341));
    }

    #[test]
    fn equal_finish_times_tie() {
        let t0 = Instant::now();
        let mut s = running_session(t0);
        let t1 = t0 + Duration::from_millis(9_000);
        s.apply_telemetry(Side::Police, &laps(10.0), t1);
        s.apply_telemetry(Side::Taxi, &laps(10.0), t1);
        let outcome = s.outcome.unwrap();
        assert_eq!(outcome.winner, Winner::Tie);
        assert_eq!(outcome.reason_text(), "Tempos iguais.");
    }

    #[test]
    fn completion_fires_once() {
        let t0 = Instant::now();
        let mut s = running_session(t0);
        s.apply_telemetry(Side::Police, &laps(10.0), t0 + Duration::from_millis(10));
        s.apply_telemetry(Side::Taxi, &laps(10.0), t0 + Duration::from_millis(20));
        assert!(s.outcome.is_some());
        assert_eq!(s.tick(t0 + Duration::from_millis(50)), None);
        assert_eq!(s.check_completion(t0 + Duration::from_millis(60)), None);
    }

    #[test]
    fn tick_stamps_pending_finish() {
        let t0 = Instant::now();
        let mut s = RaceSession::new();
        s.apply_telemetry(Side::Police, &laps(10.0), t0);
        s.apply_telemetry(Side::Taxi, &laps(10.0), t0);
        assert_eq!(s.competitors.police.finish_ms, None);
        s.start(t0, 2).unwrap();

        let outcome = s.tick(t0 + Duration::from_millis(30)).unwrap();
        assert_eq!(outcome.winner, Winner::Tie);
        assert_eq!(s.competitors.police.finish_ms, Some(30));
        assert_eq!(s.competitors.taxi.finish_ms, Some(30));
    }

    #[test]
    fn manual_finalize_compares_laps() {
        let t0 = Instant::now();
        let mut s = running_session(t0);
        s.apply_telemetry(Side::Police, &laps(7.0), t0 + Duration::from_millis(100));
        s.apply_telemetry(Side::Taxi, &laps(9.0), t0 + Duration::from_millis(200));
        assert!(s.clock.is_running());

        let outcome = s.finalize_manually(t0 + Duration::from_millis(300)).unwrap();
        assert_eq!(outcome.winner, Winner::Side(Side::Taxi));
        assert_eq!(outcome.reason, OutcomeReason::LapCount);
        assert!(!s.clock.is_running());
        assert_eq!(s.clock.elapsed_ms(), 300);
    }

    #[test]
    fn finalize_before_start_is_ignored() {
        let t0 = Instant::now();
        let mut s = RaceSession::new();
        s.apply_telemetry(Side::Police, &laps(0.0), t0);
        s.apply_telemetry(Side::Taxi, &laps(0.0), t0);

        assert_eq!(s.finalize_manually(t0), None);
        assert!(s.outcome.is_none());

        assert_eq!(s.start(t0, 1), Ok(true));
        s.apply_telemetry(Side::Police, &laps(10.0), t0 + Duration::from_millis(5_000));
        s.apply_telemetry(Side::Taxi, &laps(10.0), t0 + Duration::from_millis(6_000));
        assert_eq!(
            s.outcome,
            Some(RaceOutcome {
                winner: Winner::Side(Side::Police),
                reason: OutcomeReason::FinishTime,
            })
        );
        assert!(!s.clock.is_running());
    }

    #[test]
    fn telemetry_after_stop_does_not_stamp_finish() {
        let t0 = Instant::now();
        let mut s = running_session(t0);
        s.finalize_manually(t0 + Duration::from_millis(50));
        s.apply_telemetry(Side::Police, &laps(10.0), t0 + Duration::from_millis(80));
        assert_eq!(s.competitors.police.finish_ms, None);
        assert_eq!(s.competitors.police.laps, 10);
    }

    #[test]
    fn reset_rearms_everything() {
        let t0 = Instant::now();
        let mut s = running_session(t0);
        s.finalize_manually(t0 + Duration::from_millis(10));
        s.reset();
        assert!(!s.clock.has_started());
        assert!(s.outcome.is_none());
        assert_eq!(s.connection.police, ConnectionStatus::NotConnected);
        assert_eq!(s.competitors.taxi.quality, 200.0);
        assert!(s.clock.start(t0));
    }

    #[test]
    fn transport_missing_is_terminal() {
        let mut s = RaceSession::new();
        s.mark_transport_missing();
        s.mark_connecting();
        s.apply_telemetry(Side::Police, &laps(1.0), Instant::now());
        assert_eq!(s.connection.police, ConnectionStatus::Error);
        assert_eq!(s.connection.taxi, ConnectionStatus::Error);
    }
}
