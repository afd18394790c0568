//! # Enrichers
//!
//! Publish-time hooks that add properties to outgoing messages. They run in
//! registration order, on the publisher's task, before any delivery.

use crate::error::BusError;
use crate::message::Message;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// Adds or rewrites properties of a message about to be published.
///
/// Returning an error aborts the publish.
pub trait MessageEnricher: Send + Sync {
    fn enrich(&self, message: &mut Message) -> anyhow::Result<()>;
}

impl<F> MessageEnricher for F
where
    F: Fn(&mut Message) -> anyhow::Result<()> + Send + Sync,
{
    fn enrich(&self, message: &mut Message) -> anyhow::Result<()> {
        self(message)
    }
}

/// Ordered, append-only set of enrichers owned by one bus.
#[derive(Default)]
pub struct EnricherChain {
    enrichers: RwLock<Vec<Arc<dyn MessageEnricher>>>,
}

impl EnricherChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, enricher: Arc<dyn MessageEnricher>) {
        self.enrichers.write().push(enricher);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.enrichers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enrichers.read().is_empty()
    }

    /// Run every enricher in order; stop at the first failure.
    pub fn apply(&self, message: &mut Message) -> Result<(), BusError> {
        // Clone the list so an enricher may register another without deadlocking.
        let enrichers = self.enrichers.read().clone();
        for (index, enricher) in enrichers.iter().enumerate() {
            if let Err(source) = enricher.enrich(message) {
                warn!(enricher = index, error = %source, "Enricher failed, publish aborted");
                return Err(BusError::Enrichment {
                    enricher: index,
                    source,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EnricherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnricherChain")
            .field("len", &self.len())
            .finish()
    }
}
