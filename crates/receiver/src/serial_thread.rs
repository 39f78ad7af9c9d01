//! Thread de leitura por link: lê a porta serial e envia os pedaços para o
//! motor da corrida via channel, na ordem em que chegaram.

use crate::ports::PortReader;
use crossbeam_channel::Sender;
use mindrace_core::LinkId;
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, warn};

const READ_BUFFER: usize = 1024;

/// Mensagem enviada da thread de leitura para o motor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Chunk { link: LinkId, bytes: Vec<u8> },
    /// A leitura terminou. `reason` é `None` quando foi cancelada.
    Closed { link: LinkId, reason: Option<String> },
}

/// Controle de uma thread de leitura.
pub struct ReaderHandle {
    link: LinkId,
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Cancela a leitura e espera a thread terminar. A porta é fechada quando
    /// a thread a solta. Nunca entra em pânico.
    pub fn shutdown(mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Thread de leitura do link {} terminou com pânico", self.link);
            }
        }
    }
}

/// Inicia a thread de leitura de um link.
pub fn spawn_reader_thread(
    link: LinkId,
    port: PortReader,
    tx: Sender<LinkEvent>,
) -> std::io::Result<ReaderHandle> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    let join = std::thread::Builder::new()
        .name(format!("serial-reader-{}", link.0))
        .spawn(move || reader_loop(link, port, &tx, &flag))?;

    Ok(ReaderHandle {
        link,
        cancel,
        join: Some(join),
    })
}

fn reader_loop(link: LinkId, mut port: PortReader, tx: &Sender<LinkEvent>, cancel: &AtomicBool) {
    let mut buf = [0u8; READ_BUFFER];
    let reason = loop {
        if cancel.load(Ordering::Relaxed) {
            break None;
        }
        match port.read(&mut buf) {
            Ok(0) => break Some("fim da leitura".to_string()),
            Ok(n) => {
                // Envio bloqueante: telemetria não pode ser descartada.
                let event = LinkEvent::Chunk {
                    link,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(event).is_err() {
                    debug!("Motor encerrado, parando leitura do link {link}");
                    return;
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                // Timeout normal, continua
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    drop(port);
    let _ = tx.send(LinkEvent::Closed { link, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Cursor;
    use std::time::Duration;

    /// Fonte que só dá timeout.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(std::io::Error::new(ErrorKind::TimedOut, "timeout"))
        }
    }

    /// Fonte que falha na primeira leitura.
    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "desconectado"))
        }
    }

    #[test]
    fn forwards_bytes_in_order_then_closes() {
        let data = b"{\"lado\":\"taxi\"}\n".repeat(200);
        let (tx, rx) = unbounded();
        let handle = spawn_reader_thread(LinkId(1), Box::new(Cursor::new(data.clone())), tx).unwrap();

        let mut received = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                LinkEvent::Chunk { link, bytes } => {
                    assert_eq!(link, LinkId(1));
                    received.extend(bytes);
                }
                LinkEvent::Closed { reason, .. } => {
                    assert!(reason.is_some());
                    break;
                }
            }
        }
        assert_eq!(received, data);
        handle.shutdown();
    }

    #[test]
    fn cancel_stops_a_silent_reader() {
        let (tx, rx) = unbounded();
        let handle = spawn_reader_thread(LinkId(2), Box::new(Silent), tx).unwrap();
        handle.shutdown();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            LinkEvent::Closed {
                link: LinkId(2),
                reason: None
            }
        );
    }

    #[test]
    fn read_errors_close_the_link() {
        let (tx, rx) = unbounded();
        let handle = spawn_reader_thread(LinkId(3), Box::new(Broken), tx).unwrap();
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            LinkEvent::Closed { link, reason } => {
                assert_eq!(link, LinkId(3));
                assert_eq!(reason.as_deref(), Some("desconectado"));
            }
            other => panic!("evento inesperado: {other:?}"),
        }
        handle.shutdown();
    }
}
