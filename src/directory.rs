//! Instrument directory backed by the venue market catalogue
//!
//! Holds every instrument the adapter knows about in a session. Loaded once
//! at connect time and reloaded on explicit instrument searches.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::types::{Instrument, InstrumentFilter, InstrumentId, MUTEX_POISONED};

/// Source of instrument listings, implemented by the venue REST client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    /// List all instruments matching the filter
    async fn list_instruments(&self, filter: &InstrumentFilter) -> Result<Vec<Instrument>>;
}

/// In-memory instrument directory
pub struct InstrumentDirectory {
    source: Arc<dyn CatalogueSource>,
    instruments: RwLock<HashMap<InstrumentId, Instrument>>,
}

impl InstrumentDirectory {
    pub fn new(source: Arc<dyn CatalogueSource>) -> Self {
        Self {
            source,
            instruments: RwLock::new(HashMap::new()),
        }
    }

    /// Reload the directory from the catalogue, keeping existing entries
    ///
    /// Returns the number of instruments the catalogue reported.
    pub async fn load_all(&self, filter: &InstrumentFilter) -> Result<usize> {
        let instruments = self.source.list_instruments(filter).await?;
        let loaded = instruments.len();
        debug!(loaded, "Loaded instruments from catalogue");
        self.add_bulk(instruments);
        Ok(loaded)
    }

    /// Insert instruments, replacing entries with the same id
    pub fn add_bulk(&self, instruments: Vec<Instrument>) {
        let mut guard = self.instruments.write().expect(MUTEX_POISONED);
        for instrument in instruments {
            guard.insert(instrument.id.clone(), instrument);
        }
    }

    pub fn find(&self, id: &InstrumentId) -> Option<Instrument> {
        self.instruments
            .read()
            .expect(MUTEX_POISONED)
            .get(id)
            .cloned()
    }

    /// Every known instrument, ordered by id for deterministic delivery
    pub fn list_all(&self) -> Vec<Instrument> {
        let guard = self.instruments.read().expect(MUTEX_POISONED);
        let mut all: Vec<Instrument> = guard.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Known instruments matching the filter, ordered by id
    pub fn search(&self, filter: &InstrumentFilter) -> Vec<Instrument> {
        let guard = self.instruments.read().expect(MUTEX_POISONED);
        let mut matches: Vec<Instrument> = guard
            .values()
            .filter(|instrument| filter.matches(instrument))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    pub fn count(&self) -> usize {
        self.instruments.read().expect(MUTEX_POISONED).len()
    }
}
