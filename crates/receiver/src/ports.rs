//! Descoberta e abertura das portas seriais.
//!
//! [`PortProvider`] separa o motor da biblioteca de serial: em produção é
//! [`SerialPortProvider`], nos testes um provedor em memória.

use mindrace_core::config::SerialConfig;
use mindrace_core::links::LinkError;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};

/// Leitura de uma porta aberta.
pub type PortReader = Box<dyn Read + Send>;

/// Acesso às portas seriais do sistema.
pub trait PortProvider: Send + Sync {
    /// O sistema tem suporte a serial.
    fn is_available(&self) -> bool;

    /// Portas autorizadas anteriormente, reabertas ao iniciar.
    fn authorized(&self) -> Vec<String>;

    /// Pede uma porta nova que não esteja em `exclude`. `Ok(None)` quando não
    /// há nenhuma disponível.
    fn request(&self, exclude: &[String]) -> Result<Option<String>, LinkError>;

    /// Abre e configura uma porta.
    fn open(&self, port_name: &str) -> Result<PortReader, LinkError>;
}

/// Provedor real sobre a crate `serialport`.
#[derive(Debug, Clone)]
pub struct SerialPortProvider {
    config: SerialConfig,
}

impl SerialPortProvider {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    fn accepts(&self, port_name: &str) -> bool {
        self.config.port_prefix.is_empty() || port_name.starts_with(&self.config.port_prefix)
    }
}

impl PortProvider for SerialPortProvider {
    fn is_available(&self) -> bool {
        match serialport::available_ports() {
            Ok(_) => true,
            Err(e) => {
                debug!("Serial indisponível: {e}");
                false
            }
        }
    }

    fn authorized(&self) -> Vec<String> {
        self.config.authorized_ports.clone()
    }

    fn request(&self, exclude: &[String]) -> Result<Option<String>, LinkError> {
        let ports =
            serialport::available_ports().map_err(|e| LinkError::Enumerate(e.to_string()))?;

        let found = ports
            .into_iter()
            .map(|p| p.port_name)
            .filter(|name| self.accepts(name))
            .find(|name| !exclude.contains(name));

        match &found {
            Some(name) => info!("Porta encontrada para pareamento: {name}"),
            None => info!("Nenhuma porta nova para parear"),
        }
        Ok(found)
    }

    fn open(&self, port_name: &str) -> Result<PortReader, LinkError> {
        let mut port = serialport::new(port_name, self.config.baud_rate)
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()
            .map_err(|e| LinkError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        if self.config.assert_signals {
            if let Err(e) = port.write_data_terminal_ready(true) {
                debug!("{port_name}: DTR não suportado ({e})");
            }
            if let Err(e) = port.write_request_to_send(true) {
                debug!("{port_name}: RTS não suportado ({e})");
            }
        }

        std::thread::sleep(Duration::from_millis(self.config.settle_ms));
        info!("{port_name} aberta @ {} baud", self.config.baud_rate);
        Ok(Box::new(port))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_filter() {
        let mut config = SerialConfig::default();
        let any = SerialPortProvider::new(config.clone());
        assert!(any.accepts("/dev/ttyUSB0"));

        config.port_prefix = "/dev/ttyACM".into();
        let acm = SerialPortProvider::new(config);
        assert!(acm.accepts("/dev/ttyACM1"));
        assert!(!acm.accepts("/dev/ttyS0"));
    }

    #[test]
    fn authorized_ports_come_from_config() {
        let mut config = SerialConfig::default();
        config.authorized_ports = vec!["COM3".into(), "COM4".into()];
        let provider = SerialPortProvider::new(config);
        assert_eq!(provider.authorized(), ["COM3", "COM4"]);
    }
}
