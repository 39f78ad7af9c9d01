//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável, com seções `[serial]`,
//! `[race]` e `[ranking]`. Campos ausentes usam o valor padrão.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Baud rates das gerações de dispositivo conhecidas.
pub const SUPPORTED_BAUD_RATES: [u32; 2] = [57_600, 115_200];

/// Configuração das portas seriais.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud fixo do dispositivo (não é negociado)
    pub baud_rate: u32,
    /// Portas já autorizadas, reabertas ao iniciar
    pub authorized_ports: Vec<String>,
    /// Prefixo das portas aceitas no pareamento (vazio = qualquer)
    pub port_prefix: String,
    /// Ativa DTR/RTS ao abrir (falhas são ignoradas)
    pub assert_signals: bool,
    /// Espera após abrir a porta (ms)
    pub settle_ms: u64,
    /// Timeout de cada leitura (ms)
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            authorized_ports: Vec::new(),
            port_prefix: String::new(),
            assert_signals: true,
            settle_ms: 300,
            read_timeout_ms: 100,
        }
    }
}

/// Configuração da corrida.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Período do relógio (ms)
    pub tick_ms: u64,
    /// Dispositivos conectados necessários para iniciar
    pub min_connected_to_start: usize,
    /// Permite que um registro com `lado` explícito troque o lado do link
    pub allow_rebind: bool,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            tick_ms: 30,
            min_connected_to_start: 1,
            allow_rebind: true,
        }
    }
}

/// Configuração do ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Arquivo JSON do ranking
    pub path: String,
    /// Posições exibidas
    pub top_n: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            path: "ranking.json".into(),
            top_n: 8,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub race: RaceConfig,
    pub ranking: RankingConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        Self::exe_dir().join("config.toml")
    }

    /// Caminho do ranking: relativo ao executável se não for absoluto.
    pub fn ranking_path(&self) -> PathBuf {
        let p = PathBuf::from(&self.ranking.path);
        if p.is_absolute() { p } else { Self::exe_dir().join(p) }
    }

    fn exe_dir() -> PathBuf {
        std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            errors.push(format!(
                "Baud rate não suportado: {} (use {:?})",
                self.serial.baud_rate, SUPPORTED_BAUD_RATES
            ));
        }
        if self.race.tick_ms == 0 || self.race.tick_ms > 1000 {
            errors.push(format!(
                "Período do relógio inválido: {} ms (1–1000)",
                self.race.tick_ms
            ));
        }
        if !(1..=2).contains(&self.race.min_connected_to_start) {
            errors.push(format!(
                "Mínimo de conectados inválido: {} (1–2)",
                self.race.min_connected_to_start
            ));
        }
        if self.ranking.path.trim().is_empty() {
            errors.push("Caminho do ranking não pode ser vazio".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let mut config = AppConfig::default();
        config.serial.authorized_ports = vec!["/dev/ttyACM0".into()];
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.serial.authorized_ports, config.serial.authorized_ports);
        assert_eq!(parsed.race.tick_ms, 30);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[serial]
baud_rate = 57600
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.serial.baud_rate, 57_600);
        // Outros campos devem ter valor padrão
        assert_eq!(config.serial.settle_ms, 300);
        assert!(config.race.allow_rebind);
        assert_eq!(config.ranking.top_n, 8);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = AppConfig::default();
        config.serial.baud_rate = 9600;
        config.race.tick_ms = 0;
        config.race.min_connected_to_start = 3;
        config.ranking.path = " ".into();
        assert_eq!(config.validate().len(), 4);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Path::new("/nao/existe/config.toml"));
        assert_eq!(config.serial.baud_rate, 115_200);
    }
}
