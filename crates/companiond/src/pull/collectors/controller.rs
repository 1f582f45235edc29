//! Radio controller energy counters (wifi, modem, bluetooth).
//!
//! The controllers answer asynchronously. Each query hands the provider a
//! oneshot sender and waits at most `timeout` for the reply; on expiry the
//! sub-measurement is skipped.

use crate::providers::{
    BluetoothActivityInfo, BluetoothController, ModemController, ProviderResult, WifiController,
};
use crate::pull::{Collector, PullContext};
use async_trait::async_trait;
use companion_common::EventRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

/// Issue one callback-style request and wait for the answer
pub async fn await_controller_info<T>(
    name: &str,
    timeout: Duration,
    request: impl FnOnce(oneshot::Sender<T>) -> ProviderResult<()>,
) -> Option<T> {
    let (tx, rx) = oneshot::channel();
    if let Err(e) = request(tx) {
        warn!("Requesting {} controller info failed: {}", name, e);
        return None;
    }
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(info)) => Some(info),
        Ok(Err(_)) => {
            warn!("No controller energy info supplied for {}", name);
            None
        }
        Err(_) => {
            warn!("Timeout reading {} stats after {:?}", name, timeout);
            None
        }
    }
}

/// WIFI_ACTIVITY_INFO: timestamp, stack_state, tx, rx, idle, energy
pub struct WifiActivity {
    controller: Arc<dyn WifiController>,
    timeout: Duration,
}

impl WifiActivity {
    pub fn new(controller: Arc<dyn WifiController>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
        }
    }
}

#[async_trait]
impl Collector for WifiActivity {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let Some(info) = await_controller_info("wifi", self.timeout, |tx| {
            self.controller.request_activity_info(tx)
        })
        .await
        else {
            return Vec::new();
        };

        let mut e = ctx.record();
        e.write_long(info.timestamp_ms)
            .write_int(info.stack_state)
            .write_long(info.tx_time_ms)
            .write_long(info.rx_time_ms)
            .write_long(info.idle_time_ms)
            .write_long(info.energy_used);
        vec![e]
    }
}

/// MODEM_ACTIVITY_INFO: timestamp, sleep, idle, tx per level (5), rx, energy
pub struct ModemActivity {
    controller: Arc<dyn ModemController>,
    timeout: Duration,
}

impl ModemActivity {
    pub fn new(controller: Arc<dyn ModemController>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
        }
    }
}

#[async_trait]
impl Collector for ModemActivity {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let Some(info) = await_controller_info("modem", self.timeout, |tx| {
            self.controller.request_activity_info(tx)
        })
        .await
        else {
            return Vec::new();
        };

        let mut e = ctx.record();
        e.write_long(info.timestamp_ms)
            .write_long(info.sleep_time_ms)
            .write_long(info.idle_time_ms);
        for tx in info.tx_time_ms {
            e.write_long(tx);
        }
        e.write_long(info.rx_time_ms).write_long(info.energy_used);
        vec![e]
    }
}

/// Bluetooth requests are serialized; the controller handles one at a time
pub struct BluetoothQuery {
    controller: Arc<dyn BluetoothController>,
    timeout: Duration,
    gate: Mutex<()>,
}

impl BluetoothQuery {
    pub fn new(controller: Arc<dyn BluetoothController>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
            gate: Mutex::new(()),
        }
    }

    pub async fn fetch(&self) -> Option<BluetoothActivityInfo> {
        let _serial = self.gate.lock().await;
        await_controller_info("bluetooth", self.timeout, |tx| {
            self.controller.request_activity_info(tx)
        })
        .await
    }
}

/// BLUETOOTH_BYTES_TRANSFER: uid, rx_bytes, tx_bytes
pub struct BluetoothBytes {
    query: Arc<BluetoothQuery>,
}

impl BluetoothBytes {
    pub fn new(query: Arc<BluetoothQuery>) -> Self {
        Self { query }
    }
}

#[async_trait]
impl Collector for BluetoothBytes {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let Some(info) = self.query.fetch().await else {
            return Vec::new();
        };
        info.uid_traffic
            .iter()
            .map(|traffic| {
                let mut e = ctx.record();
                e.write_int(traffic.uid)
                    .write_long(traffic.rx_bytes)
                    .write_long(traffic.tx_bytes);
                e
            })
            .collect()
    }
}

/// BLUETOOTH_ACTIVITY_INFO: timestamp, stack_state, tx, rx, idle, energy
pub struct BluetoothActivity {
    query: Arc<BluetoothQuery>,
}

impl BluetoothActivity {
    pub fn new(query: Arc<BluetoothQuery>) -> Self {
        Self { query }
    }
}

#[async_trait]
impl Collector for BluetoothActivity {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let Some(info) = self.query.fetch().await else {
            return Vec::new();
        };
        let mut e = ctx.record();
        e.write_long(info.timestamp_ms)
            .write_int(info.stack_state)
            .write_long(info.tx_time_ms)
            .write_long(info.rx_time_ms)
            .write_long(info.idle_time_ms)
            .write_long(info.energy_used);
        vec![e]
    }
}
