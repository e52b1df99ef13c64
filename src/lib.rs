//! Parimex Market Data Adapter Library
//!
//! This crate provides streaming market data handling for the Parimex
//! betting exchange: session lifecycle, subscription management, and
//! normalization of the venue's market change stream into engine records.

pub mod adapter;
pub mod codec;
pub mod config;
pub mod data;
pub mod directory;
pub mod error;
pub mod parser;
pub mod publisher;
pub mod rest;
pub mod sink;
pub mod stream;
pub mod types;

pub use adapter::{MarketUpdatePipeline, ParimexDataClient, SubscriptionStatus};
pub use codec::{Frame, OutboundMessage};
pub use config::Config;
pub use data::{DataEvent, DataRequest, EngineMessage, NormalizedRecord, PrimaryData};
pub use directory::{CatalogueSource, InstrumentDirectory};
pub use error::{AdapterError, Result};
pub use parser::MarketChangeParser;
pub use publisher::Publisher;
pub use rest::VenueHttpClient;
pub use sink::{ChannelSink, DataSink, RequestHandler};
pub use stream::{MarketStreamClient, StreamSender};
pub use types::{BookType, Instrument, InstrumentFilter, InstrumentId, MarketId, RequestId};
