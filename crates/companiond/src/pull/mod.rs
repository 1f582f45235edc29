//! Pull dispatcher - maps a tag to its collector.
//!
//! Both clocks are sampled once per pull and shared by every record the
//! collector produces. Collectors contain their own failures: a provider
//! error means fewer records, never an error out of `pull`.

pub mod collectors;
pub mod tags;

use crate::clock::Clock;
use crate::config::CompanionConfig;
use crate::providers::Providers;
use async_trait::async_trait;
use companion_common::EventRecord;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// No collector is registered for the tag
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown pull tag {0}")]
pub struct UnknownTag(pub i32);

/// Per-pull context handed to a collector
#[derive(Debug, Clone, Copy)]
pub struct PullContext {
    pub tag: i32,
    pub elapsed_nanos: i64,
    pub wall_nanos: i64,
}

impl PullContext {
    /// Empty record stamped with this pull's tag and timestamps
    pub fn record(&self) -> EventRecord {
        EventRecord::new(self.tag, self.elapsed_nanos, self.wall_nanos)
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord>;
}

/// Run provider or filesystem work on the blocking pool so a slow read or a
/// hung mount never stalls the async workers. `None` if the task panicked.
pub async fn run_blocking<T, F>(what: &'static str, work: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Blocking {} task failed: {}", what, e);
            None
        }
    }
}

/// Stands in for a collector whose provider is absent on this host
pub struct MissingProvider {
    pub what: &'static str,
}

#[async_trait]
impl Collector for MissingProvider {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        warn!("No {} provider; tag {} yields nothing", self.what, ctx.tag);
        Vec::new()
    }
}

pub struct PullDispatcher {
    clock: Arc<dyn Clock>,
    collectors: HashMap<i32, Arc<dyn Collector>>,
}

impl PullDispatcher {
    /// Empty dispatcher; every tag is unknown until registered
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            collectors: HashMap::new(),
        }
    }

    /// Dispatcher with every supported tag wired to `providers`
    pub fn with_defaults(
        clock: Arc<dyn Clock>,
        providers: &Providers,
        config: &CompanionConfig,
    ) -> Self {
        let mut dispatcher = Self::new(Arc::clone(&clock));
        collectors::register_all(&mut dispatcher, clock, providers, config);
        dispatcher
    }

    /// Register `collector` for `tag`, replacing any previous one
    pub fn register(&mut self, tag: i32, collector: Arc<dyn Collector>) {
        if self.collectors.insert(tag, collector).is_some() {
            debug!("Replaced collector for tag {}", tag);
        }
    }

    pub fn is_supported(&self, tag: i32) -> bool {
        self.collectors.contains_key(&tag)
    }

    pub fn supported_tags(&self) -> Vec<i32> {
        let mut tags: Vec<i32> = self.collectors.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    pub async fn pull(&self, tag: i32) -> Result<Vec<EventRecord>, UnknownTag> {
        let Some(collector) = self.collectors.get(&tag) else {
            debug!("Unknown pull tag {}", tag);
            return Err(UnknownTag(tag));
        };

        let ctx = PullContext {
            tag,
            elapsed_nanos: self.clock.elapsed_realtime_nanos(),
            wall_nanos: self.clock.wall_nanos(),
        };
        let records = collector.collect(&ctx).await;
        debug!("Pulled {} records for tag {}", records.len(), tag);
        Ok(records)
    }
}
