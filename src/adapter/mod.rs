//! Venue-facing market data client
//!
//! Owns the session lifecycle (connect, disconnect, reset), the subscription
//! coordinator worker, the post-connect keep-alive, and the frame dispatch
//! loop feeding the pipeline.

mod pipeline;
mod subscription;

pub use pipeline::MarketUpdatePipeline;
pub use subscription::SubscriptionStatus;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::{self, OutboundMessage};
use crate::config::Config;
use crate::data::{DataEvent, DataRequest, InstrumentSearchResponse};
use crate::directory::InstrumentDirectory;
use crate::error::{AdapterError, Result};
use crate::rest::VenueHttpClient;
use crate::sink::{DataSink, RequestHandler, UnroutedRequestHandler};
use crate::stream::{MarketStreamClient, StreamSender};
use crate::types::{
    unix_nanos_now, BookType, InstrumentFilter, InstrumentId, RequestId, MUTEX_POISONED,
};

use subscription::SubscriptionCommand;

/// Streaming market data client for the Parimex betting exchange
pub struct ParimexDataClient {
    config: Arc<Config>,
    http: Arc<VenueHttpClient>,
    stream: Arc<MarketStreamClient>,
    directory: Arc<InstrumentDirectory>,
    sink: Arc<dyn DataSink>,
    pipeline: MarketUpdatePipeline,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    subscribed_instruments: Arc<RwLock<HashSet<InstrumentId>>>,
    degraded: Arc<AtomicBool>,
    request_handler: Arc<dyn RequestHandler>,
}

impl ParimexDataClient {
    /// Build the client and spawn its coordinator worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: Arc<Config>,
        http: Arc<VenueHttpClient>,
        directory: Arc<InstrumentDirectory>,
        sink: Arc<dyn DataSink>,
    ) -> Self {
        Self::with_request_handler(config, http, directory, sink, Arc::new(UnroutedRequestHandler))
    }

    /// Build the client with a custom handler for delegated request kinds
    pub fn with_request_handler(
        config: Arc<Config>,
        http: Arc<VenueHttpClient>,
        directory: Arc<InstrumentDirectory>,
        sink: Arc<dyn DataSink>,
        request_handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let stream = Arc::new(MarketStreamClient::new(&config.ws_endpoint, &config.api_key));
        let subscribed_instruments = Arc::new(RwLock::new(HashSet::new()));
        let degraded = Arc::new(AtomicBool::new(false));

        let (commands, _worker) = subscription::spawn(
            stream.clone() as Arc<dyn StreamSender>,
            subscribed_instruments.clone(),
            Duration::from_secs(config.subscription_delay_secs),
        );

        let pipeline = MarketUpdatePipeline::new(
            sink.clone(),
            subscribed_instruments.clone(),
            config.strict_handling,
            degraded.clone(),
        );

        Self {
            config,
            http,
            stream,
            directory,
            sink,
            pipeline,
            commands,
            keepalive: Mutex::new(None),
            subscribed_instruments,
            degraded,
            request_handler,
        }
    }

    /// Open the venue session and the streaming socket
    ///
    /// Preloads the instrument directory on first connect, pushes every
    /// known instrument downstream, and spawns the post-connect keep-alive.
    pub async fn connect(&self) -> Result<()> {
        info!("Connecting to Parimex");

        self.http.connect().await?;
        let session_token = self.http.session_token()?;
        self.stream.connect(&session_token).await?;

        if self.directory.count() == 0 {
            let filter = self.directory_filter();
            let loaded = self.directory.load_all(&filter).await?;
            info!(instruments = loaded, "Instrument directory preloaded");
        }

        let instruments = self.directory.list_all();
        debug!(count = instruments.len(), "Publishing instruments downstream");
        for instrument in instruments {
            self.sink.handle_data(DataEvent::Instrument(instrument));
        }

        let sender = self.stream.clone() as Arc<dyn StreamSender>;
        let interval = Duration::from_secs(self.config.keepalive_interval_secs);
        let count = self.config.keepalive_count;
        let handle = tokio::spawn(post_connect_heartbeat(sender, interval, count));
        *self.keepalive.lock().expect(MUTEX_POISONED) = Some(handle);

        info!("Connected to Parimex");
        Ok(())
    }

    /// Close the stream, then the venue session; each step is best-effort
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from Parimex");

        if let Some(task) = self.keepalive.lock().expect(MUTEX_POISONED).take() {
            task.abort();
            debug!("Keep-alive task cancelled");
        }

        info!("Closing streaming socket");
        if let Err(e) = self.stream.disconnect().await {
            warn!(error = %e, "Failed to close streaming socket cleanly");
        }

        info!("Closing venue session");
        if let Err(e) = self.http.disconnect().await {
            warn!(error = %e, "Failed to close venue session cleanly");
        }

        info!("Disconnected from Parimex");
        Ok(())
    }

    /// Return the adapter to its initial state
    ///
    /// Valid only while disconnected: clears both subscription sets, the
    /// subscription status, and the degrade flag. The instrument directory
    /// survives a reset.
    pub fn reset(&self) -> Result<()> {
        if self.is_connected() {
            error!("Cannot reset a connected client");
            return Err(AdapterError::StillConnected);
        }

        self.degraded.store(false, Ordering::SeqCst);
        self.commands
            .send(SubscriptionCommand::Reset)
            .map_err(|_| AdapterError::Transport("subscription coordinator stopped".to_string()))
    }

    /// Request order book data for an instrument
    ///
    /// Idempotent per market; the venue streams full L2 ladders regardless
    /// of the requested granularity.
    pub fn subscribe_order_book(
        &self,
        instrument_id: &InstrumentId,
        book_type: BookType,
        depth: Option<usize>,
    ) -> Result<()> {
        let instrument = self.directory.find(instrument_id).ok_or_else(|| {
            error!(instrument_id = %instrument_id, "Cannot subscribe to unknown instrument");
            AdapterError::UnknownInstrument(instrument_id.clone())
        })?;

        debug!(
            instrument_id = %instrument_id,
            book_type = ?book_type,
            depth = ?depth,
            "Subscription requested"
        );

        self.commands
            .send(SubscriptionCommand::Subscribe {
                instrument_id: instrument.id,
                market_id: instrument.market_id,
            })
            .map_err(|_| AdapterError::Transport("subscription coordinator stopped".to_string()))
    }

    /// The venue offers no per-market removal; this never changes state
    pub fn unsubscribe_order_book(&self, instrument_id: &InstrumentId) {
        warn!(
            instrument_id = %instrument_id,
            "Unsubscribing not supported by the streaming venue, skipping"
        );
    }

    /// Serve an engine data request
    ///
    /// Instrument searches are answered here; every other kind is delegated
    /// to the configured request handler.
    pub async fn request(&self, request: DataRequest, request_id: RequestId) -> Result<()> {
        match request {
            DataRequest::InstrumentSearch { filter } => {
                self.handle_instrument_search(&filter, request_id).await
            }
            other => self.request_handler.handle(other, request_id).await,
        }
    }

    async fn handle_instrument_search(
        &self,
        filter: &InstrumentFilter,
        request_id: RequestId,
    ) -> Result<()> {
        let loaded = self.directory.load_all(filter).await?;
        debug!(loaded, request_id = %request_id, "Directory reloaded for instrument search");

        let instruments = self.directory.search(filter);
        info!(
            matches = instruments.len(),
            request_id = %request_id,
            "Instrument search complete"
        );

        let now = unix_nanos_now();
        self.sink.handle_data_response(
            request_id,
            InstrumentSearchResponse {
                instruments,
                ts_event: now,
                ts_init: now,
            },
        );
        Ok(())
    }

    /// Pump the stream until it ends or a fatal error surfaces
    pub async fn run(&self) -> Result<()> {
        info!("Starting stream dispatch loop");
        loop {
            match self.stream.recv().await? {
                Some(raw) => self.on_stream_message(&raw)?,
                None => continue,
            }
        }
    }

    /// Decode and dispatch one raw text frame
    pub fn on_stream_message(&self, raw: &str) -> Result<()> {
        let frame = codec::decode(raw)?;
        self.pipeline.process(frame)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    /// Whether the venue has flagged the stream unreliable this session
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn directory_filter(&self) -> InstrumentFilter {
        if self.config.event_type_ids.is_empty() {
            InstrumentFilter::default()
        } else {
            InstrumentFilter {
                event_type_ids: Some(self.config.event_type_ids.clone()),
                ..InstrumentFilter::default()
            }
        }
    }
}

/// Fire-and-forget keep-alive: a fixed number of heartbeats, then done
///
/// Send failures are logged and swallowed; the connect path never observes
/// them. The handle is aborted on disconnect.
async fn post_connect_heartbeat(sender: Arc<dyn StreamSender>, interval: Duration, count: u32) {
    for n in 1..=count {
        tokio::time::sleep(interval).await;
        match sender.send(OutboundMessage::Heartbeat).await {
            Ok(()) => debug!(n, "Post-connect heartbeat sent"),
            Err(e) => warn!(error = %e, n, "Failed to send post-connect heartbeat"),
        }
    }
    debug!("Post-connect heartbeat complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EngineMessage;
    use crate::directory::MockCatalogueSource;
    use crate::types::{Instrument, MarketId};

    #[derive(Default)]
    struct RecordingSender {
        messages: std::sync::Mutex<Vec<OutboundMessage>>,
    }

    impl RecordingSender {
        fn count(&self) -> usize {
            self.messages.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl StreamSender for RecordingSender {
        async fn send(&self, message: OutboundMessage) -> Result<()> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait::async_trait]
    impl StreamSender for FailingSender {
        async fn send(&self, _message: OutboundMessage) -> Result<()> {
            Err(AdapterError::NotConnected)
        }
    }

    fn instrument(market: &str, runner: u64) -> Instrument {
        let market_id = MarketId::new(market);
        Instrument {
            id: InstrumentId::from_market_runner(&market_id, runner),
            market_id,
            runner_id: runner,
            runner_name: format!("Runner {}", runner),
            market_name: "Match Odds".to_string(),
            event_type_id: "1".to_string(),
            market_start_time: None,
        }
    }

    fn directory_with(instruments: Vec<Instrument>) -> Arc<InstrumentDirectory> {
        let mut source = MockCatalogueSource::new();
        source
            .expect_list_instruments()
            .returning(move |_| Ok(instruments.clone()));
        Arc::new(InstrumentDirectory::new(Arc::new(source)))
    }

    fn client_with(
        directory: Arc<InstrumentDirectory>,
        strict: bool,
    ) -> (ParimexDataClient, mpsc::UnboundedReceiver<EngineMessage>) {
        let config = Arc::new(Config {
            strict_handling: strict,
            ..Config::default()
        });
        let http = Arc::new(VenueHttpClient::new(&config.rest_endpoint, &config.api_key));
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(crate::sink::ChannelSink::new(tx));
        let client = ParimexDataClient::new(config, http, directory, sink);
        (client, rx)
    }

    async fn drain_worker() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_sends_three_heartbeats_then_stops() {
        let sender = Arc::new(RecordingSender::default());
        let task = tokio::spawn(post_connect_heartbeat(
            sender.clone(),
            Duration::from_secs(5),
            3,
        ));
        drain_worker().await;

        tokio::time::advance(Duration::from_secs(4)).await;
        drain_worker().await;
        assert_eq!(sender.count(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        drain_worker().await;
        assert_eq!(sender.count(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        drain_worker().await;
        assert_eq!(sender.count(), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        drain_worker().await;
        assert_eq!(sender.count(), 3);

        // No further sends once the budget is spent
        tokio::time::advance(Duration::from_secs(60)).await;
        drain_worker().await;
        assert_eq!(sender.count(), 3);
        assert!(task.is_finished());

        let sent = sender.messages.lock().unwrap().clone();
        assert!(sent.iter().all(|m| *m == OutboundMessage::Heartbeat));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_failures_are_swallowed() {
        let task = tokio::spawn(post_connect_heartbeat(
            Arc::new(FailingSender),
            Duration::from_secs(5),
            3,
        ));
        drain_worker().await;

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(5)).await;
            drain_worker().await;
        }

        assert!(task.is_finished());
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_keepalive() {
        let (client, _rx) = client_with(directory_with(Vec::new()), false);

        let sender = Arc::new(RecordingSender::default());
        let task = tokio::spawn(post_connect_heartbeat(
            sender.clone(),
            Duration::from_secs(5),
            3,
        ));
        *client.keepalive.lock().unwrap() = Some(task);
        drain_worker().await;

        client.disconnect().await.unwrap();
        assert!(client.keepalive.lock().unwrap().is_none());

        // The cancelled task never sends, no matter how long we wait
        tokio::time::advance(Duration::from_secs(60)).await;
        drain_worker().await;
        assert_eq!(sender.count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_instrument_fails() {
        let (client, _rx) = client_with(directory_with(Vec::new()), false);

        let result = client.subscribe_order_book(&InstrumentId::new("1.9-9"), BookType::L2, None);
        assert!(matches!(result, Err(AdapterError::UnknownInstrument(_))));
    }

    #[tokio::test]
    async fn test_subscribe_known_instrument_tracks_it() {
        let directory = directory_with(Vec::new());
        directory.add_bulk(vec![instrument("1.1", 7)]);
        let (client, _rx) = client_with(directory, false);

        client
            .subscribe_order_book(&InstrumentId::new("1.1-7"), BookType::L2, Some(10))
            .unwrap();
        drain_worker().await;

        let guard = client.subscribed_instruments.read().unwrap();
        assert!(guard.contains(&InstrumentId::new("1.1-7")));
    }

    #[tokio::test]
    async fn test_unsubscribe_never_removes_state() {
        let directory = directory_with(Vec::new());
        directory.add_bulk(vec![instrument("1.1", 7)]);
        let (client, _rx) = client_with(directory, false);

        client
            .subscribe_order_book(&InstrumentId::new("1.1-7"), BookType::L2, None)
            .unwrap();
        drain_worker().await;

        client.unsubscribe_order_book(&InstrumentId::new("1.1-7"));
        client.unsubscribe_order_book(&InstrumentId::new("1.9-9"));
        drain_worker().await;

        let guard = client.subscribed_instruments.read().unwrap();
        assert!(guard.contains(&InstrumentId::new("1.1-7")));
        assert_eq!(guard.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_session_state_when_disconnected() {
        let directory = directory_with(Vec::new());
        directory.add_bulk(vec![instrument("1.1", 7)]);
        let (client, _rx) = client_with(directory, false);

        client
            .subscribe_order_book(&InstrumentId::new("1.1-7"), BookType::L2, None)
            .unwrap();
        drain_worker().await;
        client.degraded.store(true, Ordering::SeqCst);

        assert!(!client.is_connected());
        client.reset().unwrap();
        drain_worker().await;

        assert!(!client.is_degraded());
        assert!(client.subscribed_instruments.read().unwrap().is_empty());
        // The directory survives a reset
        assert_eq!(client.directory.count(), 1);
    }

    #[tokio::test]
    async fn test_reset_while_connected_is_rejected() {
        let directory = directory_with(Vec::new());
        directory.add_bulk(vec![instrument("1.1", 7)]);
        let (client, _rx) = client_with(directory, false);

        client
            .subscribe_order_book(&InstrumentId::new("1.1-7"), BookType::L2, None)
            .unwrap();
        drain_worker().await;
        client.degraded.store(true, Ordering::SeqCst);

        client.stream.set_connected(true);
        assert!(client.is_connected());
        assert!(matches!(client.reset(), Err(AdapterError::StillConnected)));
        drain_worker().await;

        // A rejected reset leaves all session state alone
        assert!(client.is_degraded());
        assert!(client
            .subscribed_instruments
            .read()
            .unwrap()
            .contains(&InstrumentId::new("1.1-7")));

        // The same call goes through once the stream is down
        client.stream.set_connected(false);
        client.reset().unwrap();
        drain_worker().await;
        assert!(!client.is_degraded());
        assert!(client.subscribed_instruments.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_instrument_search_responds_with_stamped_matches() {
        let directory = directory_with(vec![instrument("1.1", 7), instrument("1.2", 8)]);
        let (client, mut rx) = client_with(directory, false);

        client
            .request(
                DataRequest::InstrumentSearch {
                    filter: InstrumentFilter::default(),
                },
                RequestId(42),
            )
            .await
            .unwrap();

        match rx.recv().await {
            Some(EngineMessage::Response { request_id, response }) => {
                assert_eq!(request_id, RequestId(42));
                assert_eq!(response.instruments.len(), 2);
                assert!(response.ts_event > 0);
                assert_eq!(response.ts_event, response.ts_init);
            }
            other => panic!("Expected Response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_requests_are_delegated() {
        let (client, _rx) = client_with(directory_with(Vec::new()), false);

        let result = client
            .request(
                DataRequest::BookSnapshot {
                    instrument_id: InstrumentId::new("1.1-7"),
                },
                RequestId(7),
            )
            .await;

        assert!(matches!(result, Err(AdapterError::UnsupportedRequest(_))));
    }

    #[tokio::test]
    async fn test_stream_message_routes_to_pipeline() {
        let directory = directory_with(Vec::new());
        directory.add_bulk(vec![instrument("1.1", 7)]);
        let (client, mut rx) = client_with(directory, true);

        client
            .subscribe_order_book(&InstrumentId::new("1.1-7"), BookType::L2, None)
            .unwrap();
        drain_worker().await;

        let raw = r#"{
            "op": "mcm",
            "publish_time": 1667288437852,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [
                    {"runner_id": 7, "bids": [["3.2", "100.0"]]},
                    {"runner_id": 9, "bids": [["2.0", "50.0"]]}
                ]
            }]
        }"#;
        client.on_stream_message(raw).unwrap();

        // Strict handling: only the subscribed runner comes through
        match rx.try_recv() {
            Ok(EngineMessage::Data(DataEvent::Market(data))) => {
                assert_eq!(data.instrument_id().as_str(), "1.1-7");
            }
            other => panic!("Expected Market, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fatal_status_surfaces_from_dispatch() {
        let (client, _rx) = client_with(directory_with(Vec::new()), false);

        let raw = r#"{"op": "status", "status_code": "FAILURE", "error_code": "CONNECTION_LIMIT", "connection_closed": true}"#;
        assert!(matches!(
            client.on_stream_message(raw),
            Err(AdapterError::UnrecoverableStream(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_frame_is_protocol_violation() {
        let (client, _rx) = client_with(directory_with(Vec::new()), false);

        assert!(matches!(
            client.on_stream_message(r#"{"op": "ocm", "publish_time": 1}"#),
            Err(AdapterError::ProtocolViolation(_))
        ));
    }
}
