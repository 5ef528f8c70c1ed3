//! Test data builders for connection configurations and layouts

use telemetry_viewer_rs::config::{Bitfield, ConnectionConfig, Field, FrameLayout, TransportConfig};
use telemetry_viewer_rs::types::{ChecksumKind, FieldType, Protocol};

/// Builder for test connection configurations
pub struct ConnectionBuilder {
    name: String,
    transport: TransportConfig,
    layout: FrameLayout,
    sample_rate_hz: u32,
    max_samples: Option<usize>,
}

impl ConnectionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportConfig::Demo,
            layout: FrameLayout::stress_test(),
            sample_rate_hz: 0,
            max_samples: None,
        }
    }

    pub fn tcp(mut self, port: u16, idle_timeout_ms: u64) -> Self {
        self.transport = TransportConfig::Tcp {
            port,
            idle_timeout_ms,
            tx: Default::default(),
        };
        self
    }

    pub fn stress_test(mut self, repetitions: Option<u32>) -> Self {
        self.transport = TransportConfig::StressTest { repetitions };
        self
    }

    pub fn layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate_hz = hz;
        self
    }

    pub fn max_samples(mut self, max: usize) -> Self {
        self.max_samples = Some(max);
        self
    }

    pub fn build(self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.name, self.transport, self.layout);
        config.sample_rate_hz = self.sample_rate_hz;
        if let Some(max) = self.max_samples {
            config.max_samples = max;
        }
        config
    }
}

/// Binary layout with a sync word, a u16 counter, one bitfield byte holding
/// a 1-bit `enable` flag and a 2-bit `mode`, and a u8 checksum
pub fn bitfield_layout() -> FrameLayout {
    FrameLayout::new(Protocol::Binary)
        .with_field(Field::new(0, "", FieldType::SyncWord(0x55)))
        .with_field(Field::new(1, "counter", FieldType::U16Le))
        .with_field(
            Field::new(3, "flags", FieldType::Bitfield)
                .with_bitfield(Bitfield::new(0, 0).with_names(["off", "on"]))
                .with_bitfield(Bitfield::new(1, 2)),
        )
        .with_field(Field::new(4, "", FieldType::Checksum(ChecksumKind::U8Sum)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_builder() {
        let config = ConnectionBuilder::new("bench")
            .tcp(9000, 500)
            .max_samples(10)
            .build();
        assert_eq!(config.name, "bench");
        assert_eq!(config.max_samples, 10);
        assert!(matches!(config.transport, TransportConfig::Tcp { port: 9000, .. }));
    }

    #[test]
    fn test_bitfield_layout_is_valid() {
        let layout = bitfield_layout();
        layout.validate().unwrap();
        assert_eq!(layout.frame_len(), 5);
        assert_eq!(layout.dataset_count(), 2);
    }
}
