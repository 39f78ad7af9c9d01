//! Protocolo de linha dos dispositivos.
//!
//! Cada dispositivo envia texto UTF-8, um objeto JSON por linha terminada
//! em `\n`:
//!
//! ```text
//! {"lado":"policia","concentracao":72,"boost":40,"voltas":3,"voltasTotal":10,"conexao":0,"relaxamento":12}
//! {"evento":"blink","lado":"taxi"}
//! ```
//!
//! - [`LineFramer`] junta os pedaços lidos da serial e separa as linhas.
//! - [`decode_record`] interpreta uma linha como telemetria ou evento.

use crate::competitor::TelemetryUpdate;
use crate::types::Side;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Valor de `evento` que marca uma piscada.
pub const BLINK_EVENT: &str = "blink";

/// Erros de decodificação. Nunca são fatais para o link.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON inválido: {0}")]
    Malformed(String),

    #[error("Registro não é um objeto JSON")]
    NotAnObject,

    #[error("Lado desconhecido: {0:?}")]
    UnknownSide(String),

    #[error("Registro sem lado e link ainda sem lado")]
    MissingSide,
}

// ──────────────────────────────────────────────
// Framing
// ──────────────────────────────────────────────

/// Buffer de linhas de um link.
///
/// Trabalha em bytes para que um caractere UTF-8 partido entre duas leituras
/// só seja decodificado quando a linha estiver completa.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acrescenta um pedaço e retorna as linhas completas, em ordem.
    ///
    /// O resto sem `\n` fica guardado até a próxima chamada.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Bytes ainda sem terminador.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

// ──────────────────────────────────────────────
// Registro bruto
// ──────────────────────────────────────────────

/// Objeto JSON como chega do dispositivo. Todos os campos são opcionais.
#[derive(Debug, Default, Deserialize)]
struct WireRecord {
    #[serde(default)]
    lado: Option<Value>,
    #[serde(default)]
    evento: Option<Value>,
    #[serde(default, deserialize_with = "lenient_number")]
    concentracao: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    boost: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    voltas: Option<f64>,
    #[serde(default, rename = "voltasTotal", deserialize_with = "lenient_number")]
    voltas_total: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    conexao: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    relaxamento: Option<f64>,
}

/// Aceita números e strings numéricas. Qualquer outra coisa vira ausente.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
    .filter(|n| n.is_finite()))
}

impl WireRecord {
    /// Lado declarado no registro. `Ok(None)` quando ausente ou vazio.
    fn declared_side(&self) -> Result<Option<Side>, ProtocolError> {
        let token = match &self.lado {
            None | Some(Value::Null) | Some(Value::Bool(false)) => return Ok(None),
            Some(Value::String(s)) if s.is_empty() => return Ok(None),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        Side::from_token(&token)
            .map(Some)
            .ok_or(ProtocolError::UnknownSide(token))
    }

    fn is_blink(&self) -> bool {
        matches!(&self.evento, Some(Value::String(e)) if e == BLINK_EVENT)
    }

    fn into_update(self) -> TelemetryUpdate {
        TelemetryUpdate {
            concentration: self.concentracao,
            boost: self.boost,
            laps: self.voltas,
            laps_total: self.voltas_total,
            quality: self.conexao,
            relaxation: self.relaxamento,
        }
    }
}

// ──────────────────────────────────────────────
// Decodificação
// ──────────────────────────────────────────────

/// De onde veio o lado de uma mensagem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideSource {
    /// Campo `lado` presente no registro.
    Declared,
    /// Lado já associado ao link.
    Fallback,
}

/// Conteúdo de uma linha decodificada.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Blink,
    Telemetry(TelemetryUpdate),
}

/// Linha decodificada e atribuída a um lado.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub side: Side,
    pub source: SideSource,
    pub message: Message,
}

/// Decodifica uma linha. `fallback` é o lado já associado ao link, se houver.
///
/// Um `lado` presente mas inválido descarta o registro; o fallback só vale
/// quando o campo está ausente ou vazio.
pub fn decode_record(line: &str, fallback: Option<Side>) -> Result<Decoded, ProtocolError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let record: WireRecord =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let (side, source) = match record.declared_side()? {
        Some(side) => (side, SideSource::Declared),
        None => match fallback {
            Some(side) => (side, SideSource::Fallback),
            None => return Err(ProtocolError::MissingSide),
        },
    };

    let message = if record.is_blink() {
        Message::Blink
    } else {
        Message::Telemetry(record.into_update())
    };

    Ok(Decoded {
        side,
        source,
        message,
    })
}
