//! Venue REST client for session and catalogue calls
//!
//! The streaming feed authorizes against a session opened here; instrument
//! listings come from the market catalogue search.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::directory::CatalogueSource;
use crate::error::{AdapterError, Result};
use crate::types::{Instrument, InstrumentFilter, InstrumentId, MarketId, MUTEX_POISONED};

const API_KEY_HEADER: &str = "X-Api-Key";
const SESSION_HEADER: &str = "X-Session-Token";

/// REST client holding the venue session
pub struct VenueHttpClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    session_token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_token: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    filter: &'a InstrumentFilter,
}

/// Market entry as listed by the catalogue search
#[derive(Debug, Clone, Deserialize)]
pub struct MarketCatalogueEntry {
    pub market_id: MarketId,
    pub market_name: String,
    pub event_type_id: String,

    #[serde(default)]
    pub market_start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub runners: Vec<RunnerCatalogueEntry>,
}

/// Runner entry within a catalogue market
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerCatalogueEntry {
    pub runner_id: u64,
    pub runner_name: String,
}

impl VenueHttpClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
            session_token: RwLock::new(None),
        }
    }

    /// Open a venue session and store its token
    pub async fn connect(&self) -> Result<()> {
        let url = format!("{}/session", self.base_url);
        debug!(url = %url, "Opening venue session");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json::<SessionResponse>()
            .await?;

        let mut guard = self.session_token.write().expect(MUTEX_POISONED);
        *guard = Some(response.session_token);

        info!("Venue session opened");
        Ok(())
    }

    /// Close the venue session; the token is dropped regardless of outcome
    pub async fn disconnect(&self) -> Result<()> {
        let token = self.session_token.write().expect(MUTEX_POISONED).take();

        if let Some(token) = token {
            let url = format!("{}/session", self.base_url);
            self.client
                .delete(&url)
                .header(SESSION_HEADER, token)
                .send()
                .await?
                .error_for_status()?;
            info!("Venue session closed");
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session_token.read().expect(MUTEX_POISONED).is_some()
    }

    /// Current session token, required to authenticate the stream
    pub fn session_token(&self) -> Result<String> {
        self.session_token
            .read()
            .expect(MUTEX_POISONED)
            .clone()
            .ok_or(AdapterError::NotConnected)
    }

    /// Search the market catalogue and return the raw entries
    pub async fn list_market_catalogue(
        &self,
        filter: &InstrumentFilter,
    ) -> Result<Vec<MarketCatalogueEntry>> {
        let token = self.session_token()?;
        let url = format!("{}/markets/search", self.base_url);

        let entries = self
            .client
            .post(&url)
            .header(SESSION_HEADER, token)
            .json(&SearchRequest { filter })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AdapterError::Directory(format!("Catalogue search failed: {}", e)))?
            .json::<Vec<MarketCatalogueEntry>>()
            .await
            .map_err(|e| AdapterError::Directory(format!("Malformed catalogue listing: {}", e)))?;

        debug!(markets = entries.len(), "Catalogue search returned");
        Ok(entries)
    }
}

#[async_trait]
impl CatalogueSource for VenueHttpClient {
    async fn list_instruments(&self, filter: &InstrumentFilter) -> Result<Vec<Instrument>> {
        let entries = self.list_market_catalogue(filter).await?;
        Ok(instruments_from_catalogue(entries))
    }
}

/// Flatten catalogue markets into one instrument per runner
pub fn instruments_from_catalogue(entries: Vec<MarketCatalogueEntry>) -> Vec<Instrument> {
    let mut instruments = Vec::new();
    for entry in entries {
        for runner in &entry.runners {
            instruments.push(Instrument {
                id: InstrumentId::from_market_runner(&entry.market_id, runner.runner_id),
                market_id: entry.market_id.clone(),
                runner_id: runner.runner_id,
                runner_name: runner.runner_name.clone(),
                market_name: entry.market_name.clone(),
                event_type_id: entry.event_type_id.clone(),
                market_start_time: entry.market_start_time,
            });
        }
    }
    instruments
}
