//! Controle da corrida pelo terminal: comandos digitados e linha de status.

use crate::engine::{Command, RaceSnapshot};
use mindrace_core::race::Winner;
use mindrace_core::ranking::Player;
use mindrace_core::types::{Side, SignalLevel, format_clock, format_final};

pub const HELP: &str = "\
Comandos:
  iniciar                              inicia a corrida
  finalizar                            finaliza manualmente (decide por voltas)
  parear                               procura dispositivos para os lados que faltam
  reabrir                              reabre as portas autorizadas
  jogador <lado> <telefone> <nome> <sobrenome>
  jogador <lado> anonimo               joga fora do ranking
  nova                                 grava o ranking e arma nova corrida
  sair                                 encerra";

/// Interpreta uma linha digitada. `None` para linhas vazias ou desconhecidas.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let cmd = match words.next()?.to_lowercase().as_str() {
        "iniciar" | "start" => Command::Start,
        "finalizar" | "fim" => Command::Finalize,
        "parear" => Command::PairMissing,
        "reabrir" => Command::ReopenAuthorized,
        "nova" => Command::NewRace,
        "sair" | "quit" => Command::Shutdown,
        "jogador" => {
            let side = Side::from_token(words.next()?)?;
            let rest: Vec<&str> = words.collect();
            let player = match rest.as_slice() {
                ["anonimo"] => Player::anonymous(side),
                [phone, first, last @ ..] if !last.is_empty() => Player {
                    joins_ranking: true,
                    phone: phone.to_string(),
                    first_name: first.to_string(),
                    last_name: last.join(" "),
                    side,
                },
                _ => return None,
            };
            Command::SetPlayer(player)
        }
        _ => return None,
    };
    Some(cmd)
}

fn signal_bars(quality: f64) -> &'static str {
    match SignalLevel::from_quality(quality).bars() {
        3 => "▮▮▮",
        2 => "▮▮▯",
        _ => "▮▯▯",
    }
}

/// Resumo de uma linha do estado da corrida.
pub fn status_line(snap: &RaceSnapshot) -> String {
    let mut line = format!(
        "[{}{}]",
        format_clock(snap.elapsed_ms),
        if snap.running { "" } else { " parado" }
    );

    for side in Side::ALL {
        let c = &snap.competitors[side];
        line.push_str(&format!(
            " | {} {} {} voltas {}/{} conc {:.0} relax {:.0} boost {:.0}",
            side.label(),
            signal_bars(c.quality),
            snap.connection[side].label(),
            c.laps,
            c.laps_total,
            c.concentration,
            c.relaxation,
            c.boost,
        ));
        if c.gated {
            line.push_str(" [relaxe]");
        }
        if snap.blinking[side] {
            line.push_str(" 👁");
        }
        if c.is_finished() {
            line.push_str(&format!(" final {}", format_final(c.finish_ms)));
        }
    }

    if snap.pairing {
        line.push_str(&format!(" | pareando… ({} link(s))", snap.links));
    }

    if let Some(outcome) = snap.outcome {
        let winner = match outcome.winner {
            Winner::Side(side) => format!("{} venceu", side.label()),
            Winner::Tie => "Empate".to_string(),
        };
        line.push_str(&format!(" | {winner}. {}", outcome.reason_text()));
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindrace_core::competitor::CompetitorState;
    use mindrace_core::race::{OutcomeReason, RaceOutcome};
    use mindrace_core::types::{ConnectionStatus, PerSide};

    fn snapshot() -> RaceSnapshot {
        RaceSnapshot {
            elapsed_ms: 83_450,
            running: true,
            started_at_ms: Some(1_700_000_000_000),
            competitors: PerSide::default(),
            connection: PerSide::new(ConnectionStatus::Connected, ConnectionStatus::Connecting),
            blinking: PerSide::default(),
            outcome: None,
            pairing: false,
            links: 1,
        }
    }

    #[test]
    fn parses_race_commands() {
        assert_eq!(parse_command("iniciar"), Some(Command::Start));
        assert_eq!(parse_command("  FINALIZAR "), Some(Command::Finalize));
        assert_eq!(parse_command("parear"), Some(Command::PairMissing));
        assert_eq!(parse_command("reabrir"), Some(Command::ReopenAuthorized));
        assert_eq!(parse_command("nova"), Some(Command::NewRace));
        assert_eq!(parse_command("sair"), Some(Command::Shutdown));
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("voar"), None);
    }

    #[test]
    fn parses_player() {
        let Some(Command::SetPlayer(p)) =
            parse_command("jogador taxi 11999990000 Maria da Silva")
        else {
            panic!("esperava jogador");
        };
        assert_eq!(p.side, Side::Taxi);
        assert!(p.joins_ranking);
        assert_eq!(p.first_name, "Maria");
        assert_eq!(p.last_name, "da Silva");

        assert_eq!(
            parse_command("jogador policia anonimo"),
            Some(Command::SetPlayer(Player::anonymous(Side::Police)))
        );
        assert_eq!(parse_command("jogador taxi 1199"), None);
        assert_eq!(parse_command("jogador moto anonimo"), None);
    }

    #[test]
    fn status_shows_clock_and_connection() {
        let line = status_line(&snapshot());
        assert!(line.starts_with("[01:23]"), "{line}");
        assert!(line.contains("Polícia ▮▯▯ conectado"));
        assert!(line.contains("Táxi ▮▯▯ conectando"));
        assert!(line.contains("voltas 0/10"));
        assert!(!line.contains("final"));
    }

    #[test]
    fn status_shows_finish_and_outcome() {
        let mut snap = snapshot();
        snap.running = false;
        snap.competitors.police = CompetitorState {
            laps: 10,
            finish_ms: Some(12_340),
            quality: 0.0,
            ..Default::default()
        };
        snap.competitors.taxi.gated = true;
        snap.outcome = Some(RaceOutcome {
            winner: Winner::Side(Side::Police),
            reason: OutcomeReason::FinishTime,
        });

        let line = status_line(&snap);
        assert!(line.starts_with("[01:23 parado]"));
        assert!(line.contains("Polícia ▮▮▮"));
        assert!(line.contains("final 00:12.34"));
        assert!(line.contains("[relaxe]"));
        assert!(line.ends_with("Polícia venceu. Menor tempo final."));
    }
}
