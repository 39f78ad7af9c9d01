//! Ranking de tempos e cadastro dos jogadores da corrida.
//!
//! O armazenamento é opaco para a corrida: só precisa de `append` e
//! `load_all`. [`JsonFileRanking`] guarda um array JSON em disco;
//! [`MemoryRanking`] serve para testes e para rodar sem arquivo.

use crate::race::RaceSession;
use crate::types::{PerSide, Side};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Erros do armazenamento do ranking.
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("Erro de E/S em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ranking corrompido: {0}")]
    Format(#[from] serde_json::Error),
}

/// Uma linha do ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    /// Telefone (só dígitos), identidade do jogador. Vazio para anônimos.
    pub phone: String,
    /// Nome de exibição.
    pub name: String,
    pub side: Side,
    pub time_ms: u64,
    pub recorded_at_ms: u64,
}

impl RankingEntry {
    /// Nome exibido: o do jogador, ou o do papel se anônimo.
    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() { self.side.label() } else { name }
    }
}

/// Armazenamento do ranking.
pub trait RankingStore: Send {
    fn append(&mut self, entry: RankingEntry) -> Result<(), RankingError>;

    /// Todas as entradas, do menor para o maior tempo.
    fn load_all(&self) -> Result<Vec<RankingEntry>, RankingError>;

    /// As `n` melhores entradas.
    fn top(&self, n: usize) -> Result<Vec<RankingEntry>, RankingError> {
        let mut all = self.load_all()?;
        all.truncate(n);
        Ok(all)
    }
}

fn sort_by_time(entries: &mut [RankingEntry]) {
    entries.sort_by_key(|e| (e.time_ms, e.recorded_at_ms));
}

// ──────────────────────────────────────────────
// Implementações
// ──────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryRanking {
    entries: Vec<RankingEntry>,
}

impl MemoryRanking {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RankingStore for MemoryRanking {
    fn append(&mut self, entry: RankingEntry) -> Result<(), RankingError> {
        self.entries.push(entry);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<RankingEntry>, RankingError> {
        let mut all = self.entries.clone();
        sort_by_time(&mut all);
        Ok(all)
    }
}

/// Ranking em um arquivo JSON (array de entradas).
#[derive(Debug, Clone)]
pub struct JsonFileRanking {
    path: PathBuf,
}

impl JsonFileRanking {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Result<Vec<RankingEntry>, RankingError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| RankingError::Io {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl RankingStore for JsonFileRanking {
    fn append(&mut self, entry: RankingEntry) -> Result<(), RankingError> {
        let mut all = self.read_raw()?;
        all.push(entry);
        let content = serde_json::to_string_pretty(&all)?;
        std::fs::write(&self.path, content).map_err(|source| RankingError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn load_all(&self) -> Result<Vec<RankingEntry>, RankingError> {
        let mut all = self.read_raw()?;
        sort_by_time(&mut all);
        Ok(all)
    }
}

// ──────────────────────────────────────────────
// Jogadores
// ──────────────────────────────────────────────

/// Mantém só os dígitos de um telefone.
pub fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Jogador de um lado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub joins_ranking: bool,
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub side: Side,
}

impl Player {
    pub fn anonymous(side: Side) -> Self {
        Self {
            joins_ranking: false,
            phone: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            side,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// Quem participa do ranking precisa de telefone com DDD e nome completo.
    pub fn is_valid(&self) -> bool {
        if !self.joins_ranking {
            return true;
        }
        let len = digits(&self.phone).len();
        (10..=11).contains(&len)
            && !self.first_name.trim().is_empty()
            && !self.last_name.trim().is_empty()
    }

    /// Cópia normalizada: telefone só com dígitos, nomes sem espaços nas pontas.
    pub fn normalized(&self) -> Self {
        if !self.joins_ranking {
            return Self::anonymous(self.side);
        }
        Self {
            joins_ranking: true,
            phone: digits(&self.phone),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            side: self.side,
        }
    }
}

/// Os dois jogadores de uma corrida.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub players: PerSide<Player>,
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            players: PerSide::from_fn(Player::anonymous),
        }
    }
}

impl Roster {
    /// Monta o cadastro a partir dos dois formulários, validando.
    pub fn from_players(a: Player, b: Player) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();
        if a.side == b.side {
            errors.push(format!("Os dois jogadores escolheram {}", a.side.label()));
        }
        for p in [&a, &b] {
            if !p.is_valid() {
                errors.push(format!("Dados incompletos para {}", p.side.label()));
            }
        }
        if a.joins_ranking && b.joins_ranking {
            let (ta, tb) = (digits(&a.phone), digits(&b.phone));
            if !ta.is_empty() && ta == tb {
                errors.push("Telefones não podem ser iguais".into());
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let (a, b) = (a.normalized(), b.normalized());
        let players = if a.side == Side::Police {
            PerSide::new(a, b)
        } else {
            PerSide::new(b, a)
        };
        Ok(Self { players })
    }
}

/// Entradas de ranking de uma corrida: uma por lado com tempo final.
pub fn entries_for_race(
    session: &RaceSession,
    roster: &Roster,
    recorded_at_ms: u64,
) -> Vec<RankingEntry> {
    Side::ALL
        .into_iter()
        .filter_map(|side| {
            let time_ms = session.competitors[side].finish_ms?;
            let player = &roster.players[side];
            Some(RankingEntry {
                phone: player.phone.clone(),
                name: player.display_name(),
                side,
                time_ms,
                recorded_at_ms,
            })
        })
        .collect()
}

/// Grava no ranking os tempos finais da corrida. Retorna quantas entradas
/// foram gravadas; falhas são registradas e não interrompem as demais.
pub fn archive_race(
    store: &mut dyn RankingStore,
    session: &RaceSession,
    roster: &Roster,
    recorded_at_ms: u64,
) -> usize {
    let mut saved = 0;
    for entry in entries_for_race(session, roster, recorded_at_ms) {
        let label = entry.display_name().to_string();
        match store.append(entry) {
            Ok(()) => {
                info!("Ranking: {label} gravado");
                saved += 1;
            }
            Err(e) => warn!("Falha ao gravar ranking de {label}: {e}"),
        }
    }
    saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::competitor::TelemetryUpdate;
    use std::time::{Duration, Instant};

    fn player(side: Side, phone: &str, first: &str) -> Player {
        Player {
            joins_ranking: true,
            phone: phone.into(),
            first_name: first.into(),
            last_name: "Silva".into(),
            side,
        }
    }

    fn entry(name: &str, time_ms: u64) -> RankingEntry {
        RankingEntry {
            phone: String::new(),
            name: name.into(),
            side: Side::Taxi,
            time_ms,
            recorded_at_ms: 1,
        }
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "mindrace_ranking_{tag}_{}_{}.json",
            std::process::id(),
            crate::race::epoch_ms()
        ))
    }

    #[test]
    fn memory_ranking_sorts_by_time() {
        let mut r = MemoryRanking::new();
        r.append(entry("b", 30_000)).unwrap();
        r.append(entry("a", 12_000)).unwrap();
        r.append(entry("c", 45_000)).unwrap();
        let all = r.load_all().unwrap();
        let names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(r.top(2).unwrap().len(), 2);
    }

    #[test]
    fn json_file_ranking_persists() {
        let path = temp_path("persist");
        let mut r = JsonFileRanking::new(&path);
        assert!(r.load_all().unwrap().is_empty());
        r.append(entry("lento", 50_000)).unwrap();
        r.append(entry("rapido", 20_000)).unwrap();

        let reopened = JsonFileRanking::new(&path);
        let all = reopened.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "rapido");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupted_file_is_reported() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{nao e json").unwrap();
        let r = JsonFileRanking::new(&path);
        assert!(matches!(r.load_all(), Err(RankingError::Format(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn anonymous_entries_use_side_label() {
        let e = entry("  ", 1);
        assert_eq!(e.display_name(), "Táxi");
    }

    #[test]
    fn roster_validation() {
        let ok = Roster::from_players(
            player(Side::Taxi, "(11) 9 9999-0000", " Ana "),
            player(Side::Police, "11 98888-7777", "Bia"),
        )
        .unwrap();
        assert_eq!(ok.players.taxi.phone, "11999990000");
        assert_eq!(ok.players.taxi.display_name(), "Ana Silva");
        assert_eq!(ok.players.police.first_name, "Bia");

        let errs = Roster::from_players(
            player(Side::Taxi, "11999990000", "Ana"),
            player(Side::Taxi, "11999990000", ""),
        )
        .unwrap_err();
        assert_eq!(errs.len(), 3);

        let anon = Roster::from_players(Player::anonymous(Side::Police), Player::anonymous(Side::Taxi));
        assert_eq!(anon.unwrap(), Roster::default());
    }

    #[test]
    fn archive_saves_only_finished_sides() {
        let t0 = Instant::now();
        let mut session = RaceSession::new();
        let update = TelemetryUpdate {
            laps: Some(0.0),
            quality: Some(0.0),
            ..Default::default()
        };
        session.apply_telemetry(Side::Police, &update, t0);
        session.start(t0, 1).unwrap();
        session.apply_telemetry(
            Side::Police,
            &TelemetryUpdate {
                laps: Some(10.0),
                concentration: Some(60.0),
                ..Default::default()
            },
            t0 + Duration::from_millis(8_000),
        );

        let roster = Roster::from_players(
            player(Side::Police, "11999990000", "Ana"),
            Player::anonymous(Side::Taxi),
        )
        .unwrap();
        let mut store = MemoryRanking::new();
        assert_eq!(archive_race(&mut store, &session, &roster, 99), 1);
        let all = store.load_all().unwrap();
        assert_eq!(all[0].time_ms, 8_000);
        assert_eq!(all[0].name, "Ana Silva");
        assert_eq!(all[0].side, Side::Police);
        assert_eq!(all[0].recorded_at_ms, 99);
    }
}
