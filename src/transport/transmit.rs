//! Outgoing data for duplex transports
//!
//! A [`TransmitQueue`] collects one-off payloads; a [`RepeatTimer`] produces
//! the configured repeating payload whenever its period elapses. Transport
//! transmit loops drain both every millisecond.

use crate::config::TxConfig;
use crate::error::{Result, TelemetryError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How [`TxPayload::data`] is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEncoding {
    /// Raw UTF-8 text
    #[default]
    Text,
    /// Space separated hex bytes, e.g. `AA 01 FF`
    Hex,
    /// Space separated binary bytes, e.g. `10101010 00000001`
    Binary,
}

/// A user-defined payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayload {
    pub data: String,
    #[serde(default)]
    pub encoding: TxEncoding,
    #[serde(default)]
    pub append_cr: bool,
    #[serde(default)]
    pub append_lf: bool,
}

impl TxPayload {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn hex(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            encoding: TxEncoding::Hex,
            ..Default::default()
        }
    }

    pub fn with_crlf(mut self, cr: bool, lf: bool) -> Self {
        self.append_cr = cr;
        self.append_lf = lf;
        self
    }

    /// Wire bytes for this payload
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = match self.encoding {
            TxEncoding::Text => self.data.as_bytes().to_vec(),
            TxEncoding::Hex => parse_tokens(&self.data, 16)?,
            TxEncoding::Binary => parse_tokens(&self.data, 2)?,
        };
        if self.append_cr {
            bytes.push(b'\r');
        }
        if self.append_lf {
            bytes.push(b'\n');
        }
        Ok(bytes)
    }
}

fn parse_tokens(data: &str, radix: u32) -> Result<Vec<u8>> {
    data.split_whitespace()
        .map(|token| {
            u8::from_str_radix(token, radix).map_err(|_| {
                TelemetryError::Config(format!("'{}' is not a valid byte.", token))
            })
        })
        .collect()
}

/// Queue of payloads waiting to be sent
#[derive(Debug, Clone)]
pub struct TransmitQueue {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl Default for TransmitQueue {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl TransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(bytes);
    }

    /// Drop everything queued, e.g. when a new TCP client attaches
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Produces the repeating payload once per period
#[derive(Debug)]
pub struct RepeatTimer {
    bytes: Option<Vec<u8>>,
    period: Duration,
    next: Instant,
}

impl RepeatTimer {
    pub fn new(config: &TxConfig) -> Result<Self> {
        let bytes = config.repeat.as_ref().map(TxPayload::to_bytes).transpose()?;
        Ok(Self {
            bytes,
            period: Duration::from_millis(config.repeat_interval_ms.max(1)),
            next: Instant::now(),
        })
    }

    /// Payload to send now, if the period has elapsed
    pub fn due(&mut self, now: Instant) -> Option<&[u8]> {
        let bytes = self.bytes.as_deref()?;
        if now < self.next {
            return None;
        }
        self.next = now + self.period;
        Some(bytes)
    }
}

/// Send every queued payload, then the repeating payload if due.
///
/// Stops at the first failing write and returns its error.
pub fn flush_pending<E>(
    queue: &TransmitQueue,
    timer: &mut RepeatTimer,
    mut send: impl FnMut(&[u8]) -> std::result::Result<(), E>,
) -> std::result::Result<usize, E> {
    let mut sent = 0;
    while let Some(bytes) = queue.pop() {
        send(&bytes)?;
        sent += bytes.len();
    }
    if let Some(bytes) = timer.due(Instant::now()) {
        send(bytes)?;
        sent += bytes.len();
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_encodings() {
        assert_eq!(TxPayload::text("hi").to_bytes().unwrap(), b"hi");
        assert_eq!(
            TxPayload::text("hi").with_crlf(true, true).to_bytes().unwrap(),
            b"hi\r\n"
        );
        assert_eq!(
            TxPayload::hex("AA 01 ff").to_bytes().unwrap(),
            vec![0xAA, 0x01, 0xFF]
        );
        let binary = TxPayload {
            data: "10101010 1".to_string(),
            encoding: TxEncoding::Binary,
            ..Default::default()
        };
        assert_eq!(binary.to_bytes().unwrap(), vec![0xAA, 0x01]);
        assert!(TxPayload::hex("GG").to_bytes().is_err());
        assert!(TxPayload::hex("").to_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_queue_clear() {
        let queue = TransmitQueue::new();
        queue.push(vec![1]);
        queue.push(vec![2]);
        assert_eq!(queue.len(), 2);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeat_timer_period() {
        let config = TxConfig {
            repeat: Some(TxPayload::text("ping")),
            repeat_interval_ms: 100,
        };
        let mut timer = RepeatTimer::new(&config).unwrap();
        let start = Instant::now();
        assert_eq!(timer.due(start), Some(&b"ping"[..]));
        assert_eq!(timer.due(start + Duration::from_millis(50)), None);
        assert!(timer.due(start + Duration::from_millis(100)).is_some());
    }

    #[test]
    fn test_flush_sends_queue_then_repeat() {
        let queue = TransmitQueue::new();
        queue.push(b"a".to_vec());
        let mut timer = RepeatTimer::new(&TxConfig {
            repeat: Some(TxPayload::text("r")),
            repeat_interval_ms: 1000,
        })
        .unwrap();
        let mut sent = Vec::new();
        let n = flush_pending::<()>(&queue, &mut timer, |b| {
            sent.extend_from_slice(b);
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(sent, b"ar");
    }

    #[test]
    fn test_flush_stops_on_error() {
        let queue = TransmitQueue::new();
        queue.push(b"a".to_vec());
        queue.push(b"b".to_vec());
        let mut timer = RepeatTimer::new(&TxConfig::default()).unwrap();
        let result = flush_pending(&queue, &mut timer, |_| Err("closed"));
        assert_eq!(result, Err("closed"));
        assert_eq!(queue.len(), 1);
    }
}
