//! Statistics and metrics

pub mod metrics;

pub use metrics::{
    Counter, FeedStats, Gauge, Histogram, HistogramSnapshot, HttpStats, ProxyStats,
    ProxyStatsSnapshot,
};
