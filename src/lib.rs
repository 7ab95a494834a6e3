pub mod cli;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod store;

pub use cluster::{ClusterDetector, ClusterKeys, CooldownMarker};
pub use config::{AppConfig, ClusterConfig, ConsistencyMode};
pub use domain::{
    BucketWallet, Chain, ClusterBucket, ClusterSignal, TokenClusterState, TradeEvent, TradeSide,
    UniqueTrader,
};
pub use error::{ClusterError, Result};
pub use services::{DedupSink, EventIngestor, IngestStats, JsonLinesSink, SignalSink};
pub use store::{Clock, InMemoryTtlStore, ManualClock, RedisTtlStore, SystemClock, TtlStore, TtlStoreExt};
