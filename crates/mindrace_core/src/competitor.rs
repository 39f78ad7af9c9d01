//! Estado de um competidor e a regra de relaxamento.
//!
//! Cada atualização de telemetria é aplicada campo a campo: campos ausentes
//! mantêm o valor anterior, campos presentes são limitados às suas faixas.
//! O bloqueio por relaxamento não é um evento: o predicado [`is_gated`] é
//! recalculado a cada atualização.

use crate::types::QUALITY_UNKNOWN;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Total de voltas quando o dispositivo não informa.
pub const DEFAULT_LAPS_TOTAL: u32 = 10;

/// Relaxamento mínimo para sair do bloqueio.
pub const RELAX_RESUME: f64 = 50.0;

/// Janela em que o olho fica "aceso" após uma piscada.
pub const BLINK_HOLD: Duration = Duration::from_millis(220);

/// Campos de telemetria presentes em um registro.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub concentration: Option<f64>,
    pub boost: Option<f64>,
    pub laps: Option<f64>,
    pub laps_total: Option<f64>,
    pub quality: Option<f64>,
    pub relaxation: Option<f64>,
}

/// Fase do competidor na corrida.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompetitorPhase {
    Idle,
    Racing,
    Gated,
    Finished,
}

/// Resultado de aplicar uma atualização.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyEffect {
    pub gated_before: bool,
    pub gated_after: bool,
    /// Tempo final registrado nesta atualização.
    pub finished_at: Option<u64>,
}

/// Predicado de bloqueio: metade da corrida, concentração zerada e
/// relaxamento abaixo de [`RELAX_RESUME`].
pub fn is_gated(laps: u32, laps_total: u32, concentration: f64, relaxation: f64) -> bool {
    u64::from(laps) * 2 >= u64::from(laps_total) && concentration <= 0.0 && relaxation < RELAX_RESUME
}

/// Estado de um competidor.
#[derive(Debug, Clone, Serialize)]
pub struct CompetitorState {
    pub concentration: f64,
    pub boost: f64,
    pub laps: u32,
    pub laps_total: u32,
    pub finish_ms: Option<u64>,
    pub relaxation: f64,
    pub gated: bool,
    /// Qualidade do link (0 melhor, 200 desconhecido).
    pub quality: f64,
    #[serde(skip)]
    pub last_update: Option<Instant>,
    #[serde(skip)]
    pub last_blink: Option<Instant>,
}

impl Default for CompetitorState {
    fn default() -> Self {
        Self {
            concentration: 0.0,
            boost: 0.0,
            laps: 0,
            laps_total: DEFAULT_LAPS_TOTAL,
            finish_ms: None,
            relaxation: 0.0,
            gated: false,
            quality: QUALITY_UNKNOWN,
            last_update: None,
            last_blink: None,
        }
    }
}

fn percent(value: Option<f64>, previous: f64) -> f64 {
    value.map_or(previous, |v| v.clamp(0.0, 100.0))
}

impl CompetitorState {
    pub fn is_finished(&self) -> bool {
        self.finish_ms.is_some()
    }

    /// Completou as voltas e tem tempo final.
    pub fn is_done(&self) -> bool {
        self.laps >= self.laps_total && self.finish_ms.is_some()
    }

    pub fn phase(&self, clock_running: bool) -> CompetitorPhase {
        if self.is_finished() {
            CompetitorPhase::Finished
        } else if self.gated {
            CompetitorPhase::Gated
        } else if clock_running {
            CompetitorPhase::Racing
        } else {
            CompetitorPhase::Idle
        }
    }

    pub fn is_blinking(&self, now: Instant) -> bool {
        self.last_blink
            .is_some_and(|t| now.saturating_duration_since(t) < BLINK_HOLD)
    }

    /// Registra uma piscada.
    pub fn blink(&mut self, now: Instant) {
        self.last_blink = Some(now);
    }

    /// Aplica uma atualização de telemetria.
    ///
    /// `elapsed_ms` é o valor do relógio no instante da aplicação, ou `None`
    /// se o relógio não está correndo.
    pub fn apply(
        &mut self,
        update: &TelemetryUpdate,
        elapsed_ms: Option<u64>,
        now: Instant,
    ) -> ApplyEffect {
        let gated_before = self.gated;

        if let Some(q) = update.quality {
            self.quality = q.clamp(0.0, QUALITY_UNKNOWN);
        }
        self.concentration = percent(update.concentration, self.concentration);
        self.boost = percent(update.boost, self.boost);
        self.relaxation = percent(update.relaxation, self.relaxation);
        self.last_update = Some(now);

        // Depois do tempo final as voltas ficam congeladas.
        if self.finish_ms.is_none() {
            if let Some(total) = update.laps_total.map(f64::floor).filter(|t| *t >= 1.0) {
                self.laps_total = total.min(f64::from(u32::MAX)) as u32;
            }

            let candidate = update
                .laps
                .map_or(self.laps, |v| v.floor().clamp(0.0, f64::from(self.laps_total)) as u32)
                .min(self.laps_total);

            self.gated = is_gated(candidate, self.laps_total, self.concentration, self.relaxation);
            self.laps = if self.gated {
                self.laps.min(candidate)
            } else {
                candidate
            };
        } else {
            self.gated = false;
        }

        ApplyEffect {
            gated_before,
            gated_after: self.gated,
            finished_at: self.check_finish(elapsed_ms),
        }
    }

    /// Registra o tempo final se as voltas foram completadas com o relógio
    /// correndo. Acontece no máximo uma vez.
    pub fn check_finish(&mut self, elapsed_ms: Option<u64>) -> Option<u64> {
        let elapsed = elapsed_ms?;
        if self.finish_ms.is_none() && self.laps >= self.laps_total {
            self.finish_ms = Some(elapsed);
            return Some(elapsed);
        }
        None
    }
}
