//! Per-uid network traffic.

use crate::providers::{NetworkStatsProvider, Transport};
use crate::pull::{Collector, PullContext};
use async_trait::async_trait;
use companion_common::EventRecord;
use std::sync::Arc;
use tracing::warn;

/// Bytes and packets per uid for one transport.
///
/// Plain layout: uid, rx_bytes, tx_bytes, tx_packets.
/// Fg/bg layout: uid, set, rx_bytes, rx_packets, tx_bytes, tx_packets.
pub struct NetworkBytes {
    provider: Arc<dyn NetworkStatsProvider>,
    transport: Transport,
    by_fg_bg: bool,
}

impl NetworkBytes {
    pub fn new(
        provider: Arc<dyn NetworkStatsProvider>,
        transport: Transport,
        by_fg_bg: bool,
    ) -> Self {
        Self {
            provider,
            transport,
            by_fg_bg,
        }
    }
}

#[async_trait]
impl Collector for NetworkBytes {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let entries = match self.provider.uid_stats(self.transport, self.by_fg_bg) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Pulling {:?} network stats failed: {}", self.transport, e);
                return Vec::new();
            }
        };

        entries
            .iter()
            .map(|entry| {
                let mut e = ctx.record();
                e.write_int(entry.uid);
                if self.by_fg_bg {
                    e.write_int(entry.set)
                        .write_long(entry.rx_bytes)
                        .write_long(entry.rx_packets);
                } else {
                    e.write_long(entry.rx_bytes);
                }
                e.write_long(entry.tx_bytes).write_long(entry.tx_packets);
                e
            })
            .collect()
    }
}
