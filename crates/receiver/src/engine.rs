//! Motor da corrida: dono único do estado.
//!
//! Recebe pelos channels os pedaços lidos de cada link, os resultados do
//! pareamento, os comandos do controle da corrida e o tick do relógio, e os
//! aplica um de cada vez à [`RaceSession`]. Publica um [`RaceSnapshot`]
//! para a apresentação a cada tick.

use crate::ports::{PortProvider, PortReader};
use crate::serial_thread::{self, LinkEvent, ReaderHandle};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, unbounded};
use mindrace_core::config::AppConfig;
use mindrace_core::competitor::CompetitorState;
use mindrace_core::links::{LinkId, LinkManager};
use mindrace_core::race::{RaceOutcome, RaceSession, epoch_ms};
use mindrace_core::ranking::{Player, RankingStore, Roster, archive_race};
use mindrace_core::types::{ConnectionStatus, PerSide};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SNAPSHOT_BUFFER: usize = 64;

/// Comandos do controle da corrida e do pareamento.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ReopenAuthorized,
    PairMissing,
    Start,
    Finalize,
    SetPlayer(Player),
    /// Grava o ranking da corrida atual e arma uma nova.
    NewRace,
    Shutdown,
}

/// Resultado das threads que abrem portas (pareamento e reabertura).
pub enum PairingEvent {
    Opened { port_name: String, port: PortReader },
    Failed { reason: String },
    /// Fim do pareamento, ou da reabertura das autorizadas com `reopen`.
    Finished { reopen: bool },
}

/// Estado da corrida para a apresentação.
#[derive(Debug, Clone, Serialize)]
pub struct RaceSnapshot {
    pub elapsed_ms: u64,
    pub running: bool,
    /// Início da corrida em ms desde a época Unix.
    pub started_at_ms: Option<u64>,
    pub competitors: PerSide<CompetitorState>,
    pub connection: PerSide<ConnectionStatus>,
    pub blinking: PerSide<bool>,
    pub outcome: Option<RaceOutcome>,
    pub pairing: bool,
    pub links: usize,
}

/// Motor da corrida.
pub struct Engine {
    config: AppConfig,
    provider: Arc<dyn PortProvider>,
    session: RaceSession,
    links: LinkManager,
    readers: HashMap<LinkId, ReaderHandle>,
    roster: Roster,
    ranking: Box<dyn RankingStore>,
    link_tx: Sender<LinkEvent>,
    link_rx: Receiver<LinkEvent>,
    pair_tx: Sender<PairingEvent>,
    pair_rx: Receiver<PairingEvent>,
    snapshots: Sender<RaceSnapshot>,
    reopening: bool,
    pair_after_reopen: bool,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn PortProvider>,
        ranking: Box<dyn RankingStore>,
        snapshots: Sender<RaceSnapshot>,
    ) -> Self {
        let (link_tx, link_rx) = unbounded();
        let (pair_tx, pair_rx) = unbounded();
        let links = LinkManager::new(config.race.allow_rebind);
        Self {
            config,
            provider,
            session: RaceSession::new(),
            links,
            readers: HashMap::new(),
            roster: Roster::default(),
            ranking,
            link_tx,
            link_rx,
            pair_tx,
            pair_rx,
            snapshots,
            reopening: false,
            pair_after_reopen: false,
        }
    }

    /// Loop principal. Termina com `Command::Shutdown` ou quando o channel
    /// de comandos fecha; em seguida fecha todos os links.
    pub fn run(mut self, commands: Receiver<Command>) {
        let ticker = crossbeam_channel::tick(Duration::from_millis(self.config.race.tick_ms));
        let link_rx = self.link_rx.clone();
        let pair_rx = self.pair_rx.clone();

        loop {
            select! {
                recv(link_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_link_event(event, Instant::now());
                    }
                }
                recv(pair_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_pairing_event(event);
                    }
                }
                recv(commands) -> cmd => match cmd {
                    Ok(cmd) => {
                        if !self.handle_command(cmd, Instant::now()) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.on_tick(Instant::now()),
            }
        }

        self.teardown();
    }

    // ──────────────────────────────────────────
    // Eventos
    // ──────────────────────────────────────────

    /// Aplica um comando. Retorna `false` para encerrar.
    pub fn handle_command(&mut self, cmd: Command, now: Instant) -> bool {
        match cmd {
            Command::ReopenAuthorized => {
                self.reopen_authorized();
            }
            Command::PairMissing => {
                self.pair_missing();
            }
            Command::Start => {
                if let Err(e) = self
                    .session
                    .start(now, self.config.race.min_connected_to_start)
                {
                    warn!("Início recusado: {e}");
                }
            }
            Command::Finalize => {
                self.session.finalize_manually(now);
            }
            Command::SetPlayer(player) => self.set_player(player),
            Command::NewRace => self.new_race(),
            Command::Shutdown => {
                info!("Encerrando motor da corrida");
                return false;
            }
        }
        self.publish(now);
        true
    }

    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Chunk { link, bytes } => {
                match self.links.ingest(link, &bytes, &mut self.session, now) {
                    Ok(report) if report.discarded > 0 => {
                        debug!("Link {link}: {report:?}");
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Pedaço ignorado: {e}"),
                }
            }
            LinkEvent::Closed { link, reason } => {
                if let Some(reason) = reason {
                    warn!("Link {link} perdido: {reason}");
                }
                self.close_link(link);
            }
        }
    }

    pub fn handle_pairing_event(&mut self, event: PairingEvent) {
        match event {
            PairingEvent::Opened { port_name, port } => self.attach_port(&port_name, port),
            PairingEvent::Failed { reason } => warn!("Abertura de porta: {reason}"),
            PairingEvent::Finished { reopen: true } => {
                self.reopening = false;
                info!("Portas autorizadas reabertas ({} link(s))", self.links.len());
                if std::mem::take(&mut self.pair_after_reopen) {
                    self.pair_missing();
                }
            }
            PairingEvent::Finished { reopen: false } => {
                self.links.finish_pairing();
                info!("Pareamento concluído ({} link(s))", self.links.len());
            }
        }
    }

    pub fn on_tick(&mut self, now: Instant) {
        self.session.tick(now);
        self.publish(now);
    }

    // ──────────────────────────────────────────
    // Links
    // ──────────────────────────────────────────

    /// Reabre as portas autorizadas anteriormente, até dois links, numa
    /// thread separada. Retorna `false` se nada foi iniciado.
    pub fn reopen_authorized(&mut self) -> bool {
        if !self.ensure_transport() {
            return false;
        }
        if self.reopening || self.links.is_pairing() {
            debug!("Reabertura ignorada: portas já sendo abertas");
            return false;
        }
        let open = self.links.port_names();
        let ports: Vec<String> = self
            .provider
            .authorized()
            .into_iter()
            .filter(|p| !open.contains(p))
            .take(self.links.open_slots())
            .collect();
        if ports.is_empty() {
            return false;
        }
        self.session.mark_connecting();

        let provider = Arc::clone(&self.provider);
        let tx = self.pair_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("serial-reopen".into())
            .spawn(move || reopen_loop(provider.as_ref(), ports, &tx));
        if let Err(e) = spawned {
            warn!("Falha ao iniciar reabertura: {e}");
            return false;
        }
        self.reopening = true;
        true
    }

    /// Pede portas novas para os lados que faltam, numa thread separada.
    /// Retorna `false` se nada foi iniciado.
    pub fn pair_missing(&mut self) -> bool {
        if !self.ensure_transport() {
            return false;
        }
        if self.reopening {
            debug!("Pareamento adiado até o fim da reabertura");
            self.pair_after_reopen = true;
            return false;
        }
        if !self.links.begin_pairing() {
            debug!("Pareamento ignorado: em andamento ou links completos");
            return false;
        }
        self.session.mark_connecting();

        let provider = Arc::clone(&self.provider);
        let tx = self.pair_tx.clone();
        let exclude = self.links.port_names();
        let missing = self.links.open_slots();

        let spawned = std::thread::Builder::new()
            .name("serial-pairing".into())
            .spawn(move || pairing_loop(provider.as_ref(), exclude, missing, &tx));
        if let Err(e) = spawned {
            warn!("Falha ao iniciar pareamento: {e}");
            self.links.finish_pairing();
            return false;
        }
        true
    }

    fn ensure_transport(&mut self) -> bool {
        if self.links.is_disabled() {
            return false;
        }
        if !self.provider.is_available() {
            self.links.disable_transport(&mut self.session);
            return false;
        }
        true
    }

    fn attach_port(&mut self, port_name: &str, port: PortReader) {
        let id = match self.links.attach(port_name) {
            Ok(id) => id,
            Err(e) => {
                warn!("Porta {port_name} descartada: {e}");
                return;
            }
        };
        match serial_thread::spawn_reader_thread(id, port, self.link_tx.clone()) {
            Ok(handle) => {
                self.readers.insert(id, handle);
            }
            Err(e) => {
                warn!("Falha ao iniciar leitura de {port_name}: {e}");
                self.links.detach(id);
            }
        }
    }

    fn close_link(&mut self, id: LinkId) {
        if let Some(handle) = self.readers.remove(&id) {
            handle.shutdown();
        }
        self.links.detach(id);
    }

    /// Fecha todos os links. Cada passo pode falhar sem impedir os demais.
    pub fn teardown(&mut self) {
        let ids: Vec<LinkId> = self.links.links().iter().map(|l| l.id).collect();
        for id in ids {
            self.close_link(id);
        }
        for (_, handle) in self.readers.drain() {
            handle.shutdown();
        }
    }

    // ──────────────────────────────────────────
    // Corrida
    // ──────────────────────────────────────────

    fn set_player(&mut self, player: Player) {
        let other = self.roster.players[player.side.other()].clone();
        match Roster::from_players(player, other) {
            Ok(roster) => {
                self.roster = roster;
                info!("Jogadores atualizados");
            }
            Err(errors) => {
                for e in errors {
                    warn!("Jogador recusado: {e}");
                }
            }
        }
    }

    fn new_race(&mut self) {
        let saved = archive_race(
            self.ranking.as_mut(),
            &self.session,
            &self.roster,
            epoch_ms(),
        );
        if saved > 0 {
            info!("{saved} tempo(s) gravado(s) no ranking");
        }
        self.session.reset();
        self.roster = Roster::default();
        if self.links.is_disabled() {
            self.session.mark_transport_missing();
        }
    }

    pub fn snapshot(&self, now: Instant) -> RaceSnapshot {
        RaceSnapshot {
            elapsed_ms: self.session.clock.elapsed_ms(),
            running: self.session.clock.is_running(),
            started_at_ms: self.session.clock.start_epoch_ms(),
            competitors: self.session.competitors.clone(),
            connection: self.session.connection,
            blinking: PerSide::from_fn(|side| self.session.competitors[side].is_blinking(now)),
            outcome: self.session.outcome,
            pairing: self.links.is_pairing(),
            links: self.links.len(),
        }
    }

    fn publish(&self, now: Instant) {
        // Non-blocking send: se a apresentação está lenta, descarta snapshots
        match self.snapshots.try_send(self.snapshot(now)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => debug!("Channel de snapshots cheio, descartando"),
        }
    }
}

fn pairing_loop(
    provider: &dyn PortProvider,
    mut exclude: Vec<String>,
    missing: usize,
    tx: &Sender<PairingEvent>,
) {
    for _ in 0..missing {
        let port_name = match provider.request(&exclude) {
            Ok(Some(name)) => name,
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(PairingEvent::Failed {
                    reason: e.to_string(),
                });
                break;
            }
        };
        match provider.open(&port_name) {
            Ok(port) => {
                exclude.push(port_name.clone());
                let _ = tx.send(PairingEvent::Opened { port_name, port });
            }
            Err(e) => {
                let _ = tx.send(PairingEvent::Failed {
                    reason: e.to_string(),
                });
                break;
            }
        }
    }
    let _ = tx.send(PairingEvent::Finished { reopen: false });
}

/// Abre cada porta da lista; uma falha não impede as demais.
fn reopen_loop(provider: &dyn PortProvider, ports: Vec<String>, tx: &Sender<PairingEvent>) {
    for port_name in ports {
        let event = match provider.open(&port_name) {
            Ok(port) => PairingEvent::Opened { port_name, port },
            Err(e) => PairingEvent::Failed {
                reason: e.to_string(),
            },
        };
        if tx.send(event).is_err() {
            return;
        }
    }
    let _ = tx.send(PairingEvent::Finished { reopen: true });
}

// ──────────────────────────────────────────────
// Handle
// ──────────────────────────────────────────────

/// Handle do motor rodando em sua própria thread.
pub struct EngineHandle {
    commands: Sender<Command>,
    pub snapshots: Receiver<RaceSnapshot>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn commands(&self) -> Sender<Command> {
        self.commands.clone()
    }

    pub fn send(&self, cmd: Command) -> bool {
        self.commands.send(cmd).is_ok()
    }

    /// Espera o motor terminar.
    pub fn join(mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Motor da corrida terminou com pânico");
            }
        }
    }
}

/// Inicia o motor em uma thread.
pub fn spawn_engine(
    config: AppConfig,
    provider: Arc<dyn PortProvider>,
    ranking: Box<dyn RankingStore>,
) -> std::io::Result<EngineHandle> {
    let (cmd_tx, cmd_rx) = unbounded::<Command>();
    let (snap_tx, snap_rx) = bounded::<RaceSnapshot>(SNAPSHOT_BUFFER);
    let engine = Engine::new(config, provider, ranking, snap_tx);

    let join = std::thread::Builder::new()
        .name("race-engine".into())
        .spawn(move || engine.run(cmd_rx))?;

    Ok(EngineHandle {
        commands: cmd_tx,
        snapshots: snap_rx,
        join: Some(join),
    })
}
