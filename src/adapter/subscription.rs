//! Subscription coordination for the streaming feed
//!
//! The venue protocol has replace semantics: every subscribe message names
//! the full market set and triggers a snapshot for each named market. A
//! single worker owns all subscription state and batches requests, so
//! concurrent callers never race each other into snapshot storms.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::codec::OutboundMessage;
use crate::stream::StreamSender;
use crate::types::{InstrumentId, MarketId, MUTEX_POISONED};

/// Subscription lifecycle for one adapter session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Unsubscribed,
    PendingStartup,
    Running,
}

/// Commands accepted by the coordinator worker
#[derive(Debug)]
pub(crate) enum SubscriptionCommand {
    Subscribe {
        instrument_id: InstrumentId,
        market_id: MarketId,
    },
    Reset,
}

/// Spawn the coordinator worker and return its command handle
pub(crate) fn spawn(
    sender: Arc<dyn StreamSender>,
    subscribed_instruments: Arc<RwLock<HashSet<InstrumentId>>>,
    startup_delay: Duration,
) -> (mpsc::UnboundedSender<SubscriptionCommand>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let coordinator = SubscriptionCoordinator::new(sender, subscribed_instruments, startup_delay);
    let worker = tokio::spawn(coordinator.run(command_rx));
    (command_tx, worker)
}

/// Single-owner subscription state machine
///
/// All mutation happens inside the worker task; callers reach it through the
/// command channel. The instrument set is mirrored into a shared read-only
/// view for the dispatch pipeline's strict filter.
pub(crate) struct SubscriptionCoordinator {
    sender: Arc<dyn StreamSender>,
    subscribed_instruments: Arc<RwLock<HashSet<InstrumentId>>>,
    markets: HashSet<MarketId>,
    status: SubscriptionStatus,
    startup_delay: Duration,
    next_send: Option<Instant>,
}

impl SubscriptionCoordinator {
    pub(crate) fn new(
        sender: Arc<dyn StreamSender>,
        subscribed_instruments: Arc<RwLock<HashSet<InstrumentId>>>,
        startup_delay: Duration,
    ) -> Self {
        Self {
            sender,
            subscribed_instruments,
            markets: HashSet::new(),
            status: SubscriptionStatus::Unsubscribed,
            startup_delay,
            next_send: None,
        }
    }

    /// Run the worker until every command handle is dropped
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SubscriptionCommand>) {
        // Parked far in the future until a deadline is armed; the branch
        // guard keeps it from firing while nothing is pending.
        let sleep = tokio::time::sleep(Duration::from_secs(3600));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                maybe_command = commands.recv() => match maybe_command {
                    Some(command) => {
                        if let Some(deadline) = self.handle_command(command) {
                            sleep.as_mut().reset(deadline);
                        }
                    }
                    None => {
                        debug!("Command channel closed, coordinator stopping");
                        break;
                    }
                },
                () = &mut sleep, if self.next_send.is_some() => {
                    self.flush().await;
                }
            }
        }
    }

    /// Returns a deadline when the send timer must be (re)armed
    fn handle_command(&mut self, command: SubscriptionCommand) -> Option<Instant> {
        match command {
            SubscriptionCommand::Subscribe {
                instrument_id,
                market_id,
            } => self.handle_subscribe(instrument_id, market_id),
            SubscriptionCommand::Reset => {
                self.handle_reset();
                None
            }
        }
    }

    fn handle_subscribe(
        &mut self,
        instrument_id: InstrumentId,
        market_id: MarketId,
    ) -> Option<Instant> {
        if self.markets.contains(&market_id) {
            warn!(market_id = %market_id, "Already subscribed to market, skipping");
            return None;
        }

        self.markets.insert(market_id.clone());
        self.subscribed_instruments
            .write()
            .expect(MUTEX_POISONED)
            .insert(instrument_id);

        match self.status {
            SubscriptionStatus::Unsubscribed => {
                info!(
                    market_id = %market_id,
                    delay_secs = self.startup_delay.as_secs(),
                    "First subscription, scheduling startup batch"
                );
                self.status = SubscriptionStatus::PendingStartup;
                self.schedule(self.startup_delay)
            }
            SubscriptionStatus::PendingStartup => {
                debug!(market_id = %market_id, "Absorbed into pending startup batch");
                None
            }
            SubscriptionStatus::Running => {
                debug!(market_id = %market_id, "Scheduling immediate resubscription");
                self.schedule(Duration::ZERO)
            }
        }
    }

    /// Keep the earliest pending deadline; later requests never delay a send
    fn schedule(&mut self, delay: Duration) -> Option<Instant> {
        let deadline = Instant::now() + delay;
        match self.next_send {
            Some(existing) if existing <= deadline => None,
            _ => {
                self.next_send = Some(deadline);
                Some(deadline)
            }
        }
    }

    fn handle_reset(&mut self) {
        info!("Clearing subscription state");
        self.markets.clear();
        self.subscribed_instruments
            .write()
            .expect(MUTEX_POISONED)
            .clear();
        self.status = SubscriptionStatus::Unsubscribed;
        self.next_send = None;
    }

    /// Send one subscription covering the entire current market set
    async fn flush(&mut self) {
        self.next_send = None;

        let mut market_ids: Vec<MarketId> = self.markets.iter().cloned().collect();
        if market_ids.is_empty() {
            debug!("No markets to subscribe, skipping send");
            return;
        }
        market_ids.sort();

        info!(markets = market_ids.len(), "Sending subscription batch");
        self.status = SubscriptionStatus::Running;

        let message = OutboundMessage::Subscribe { market_ids };
        if let Err(e) = self.sender.send(message).await {
            error!(error = %e, "Failed to send subscription batch");
        }
    }
}
