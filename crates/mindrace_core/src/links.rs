//! Controle dos links seriais (no máximo dois).
//!
//! Este módulo não faz E/S: guarda o lado de cada link, o buffer de linhas,
//! o estado do pareamento e se o sistema tem suporte a serial. A abertura
//! das portas e as threads de leitura ficam no receiver.

use crate::protocol::{LineFramer, Message, SideSource, decode_record};
use crate::race::RaceSession;
use crate::types::Side;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Máximo de links simultâneos (um por lado).
pub const MAX_LINKS: usize = 2;

/// Erros de link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial não disponível neste sistema")]
    TransportUnavailable,

    #[error("Já existem {MAX_LINKS} links abertos")]
    Full,

    #[error("Porta {0} já está aberta")]
    AlreadyOpen(String),

    #[error("Link desconhecido: {0}")]
    UnknownLink(LinkId),

    #[error("Falha ao abrir {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Falha ao listar portas: {0}")]
    Enumerate(String),
}

/// Identificador de um link dentro do processo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Uma conexão serial aberta.
#[derive(Debug)]
pub struct Link {
    pub id: LinkId,
    pub port_name: String,
    pub side: Option<Side>,
    pub last_quality: Option<f64>,
    framer: LineFramer,
}

/// Contagem do que aconteceu com um pedaço recebido.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub records: usize,
    pub applied: usize,
    pub discarded: usize,
}

/// Tabela de links de uma instância de corrida.
#[derive(Debug)]
pub struct LinkManager {
    links: Vec<Link>,
    next_id: u32,
    pairing: bool,
    transport_missing: bool,
    allow_rebind: bool,
}

impl LinkManager {
    pub fn new(allow_rebind: bool) -> Self {
        Self {
            links: Vec::with_capacity(MAX_LINKS),
            next_id: 1,
            pairing: false,
            transport_missing: false,
            allow_rebind,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn open_slots(&self) -> usize {
        MAX_LINKS.saturating_sub(self.links.len())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.iter().find(|l| l.id == id)
    }

    pub fn port_names(&self) -> Vec<String> {
        self.links.iter().map(|l| l.port_name.clone()).collect()
    }

    /// Sem serial, toda operação de conexão vira no-op.
    pub fn is_disabled(&self) -> bool {
        self.transport_missing
    }

    pub fn is_pairing(&self) -> bool {
        self.pairing
    }

    /// Marca a ausência de serial e os dois lados como erro.
    pub fn disable_transport(&mut self, session: &mut RaceSession) {
        if !self.transport_missing {
            warn!("Serial não suportada: conexões desativadas");
        }
        self.transport_missing = true;
        self.pairing = false;
        session.mark_transport_missing();
    }

    /// Começa um pareamento. `false` se já há um em andamento, se os dois
    /// links já existem ou se não há serial.
    pub fn begin_pairing(&mut self) -> bool {
        if self.transport_missing || self.pairing || self.open_slots() == 0 {
            return false;
        }
        self.pairing = true;
        true
    }

    pub fn finish_pairing(&mut self) {
        self.pairing = false;
    }

    /// Registra uma porta recém-aberta.
    pub fn attach(&mut self, port_name: &str) -> Result<LinkId, LinkError> {
        if self.transport_missing {
            return Err(LinkError::TransportUnavailable);
        }
        if self.open_slots() == 0 {
            return Err(LinkError::Full);
        }
        if self.links.iter().any(|l| l.port_name == port_name) {
            return Err(LinkError::AlreadyOpen(port_name.to_string()));
        }

        let id = LinkId(self.next_id);
        self.next_id += 1;
        self.links.push(Link {
            id,
            port_name: port_name.to_string(),
            side: None,
            last_quality: None,
            framer: LineFramer::new(),
        });
        info!("Link {id} aberto em {port_name}");
        Ok(id)
    }

    /// Remove um link e descarta o buffer pendente.
    pub fn detach(&mut self, id: LinkId) -> Option<Link> {
        let pos = self.links.iter().position(|l| l.id == id)?;
        let link = self.links.remove(pos);
        if link.framer.pending() > 0 {
            debug!(
                "Link {id}: descartando {} bytes sem terminador",
                link.framer.pending()
            );
        }
        match link.last_quality {
            Some(q) => info!("Link {id} ({}) fechado, última qualidade {q:.0}", link.port_name),
            None => info!("Link {id} ({}) fechado", link.port_name),
        }
        Some(link)
    }

    /// Alimenta um pedaço lido do link: separa linhas, decodifica e aplica
    /// cada registro à sessão, na ordem de chegada.
    pub fn ingest(
        &mut self,
        id: LinkId,
        chunk: &[u8],
        session: &mut RaceSession,
        now: Instant,
    ) -> Result<IngestReport, LinkError> {
        let allow_rebind = self.allow_rebind;
        let link = self
            .links
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(LinkError::UnknownLink(id))?;

        let mut report = IngestReport::default();
        for line in link.framer.push(chunk) {
            report.records += 1;

            let decoded = match decode_record(&line, link.side) {
                Ok(d) => d,
                Err(e) => {
                    debug!("Link {id}: registro descartado ({e})");
                    report.discarded += 1;
                    continue;
                }
            };

            if decoded.source == SideSource::Declared && link.side != Some(decoded.side) {
                match link.side {
                    None => {
                        info!("Link {id} associado a {}", decoded.side.label());
                        link.side = Some(decoded.side);
                    }
                    Some(bound) if allow_rebind => {
                        info!(
                            "Link {id} reassociado de {} para {}",
                            bound.label(),
                            decoded.side.label()
                        );
                        link.side = Some(decoded.side);
                    }
                    Some(bound) => {
                        debug!(
                            "Link {id}: registro de {} ignorado (link é de {})",
                            decoded.side.label(),
                            bound.label()
                        );
                        report.discarded += 1;
                        continue;
                    }
                }
            }

            if let Message::Telemetry(update) = &decoded.message {
                if let Some(q) = update.quality {
                    link.last_quality = Some(q);
                }
            }
            session.apply_message(&decoded, now);
            report.applied += 1;
        }
        Ok(report)
    }
}
