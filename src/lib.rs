// Library interface for the velometrics activity analytics engine
// This allows integration tests to access the core functionality

pub mod altitude;
pub mod config;
pub mod database;
pub mod derived;
pub mod error;
pub mod ftp;
pub mod heartrate;
pub mod ingest;
pub mod intervals;
pub mod intervals_store;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pmc;
pub mod power;
#[cfg(feature = "charts")]
pub mod preview;
pub mod records;
pub mod result_cache;
pub mod sample_table;
pub mod service;
pub mod stream_cache;
pub mod timeutil;
pub mod training_effect;
pub mod zones;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use database::Database;
pub use error::{AnalyticsError, ErrorKind, Result};
pub use intervals::{detect_intervals, Classification, IntervalDetectionResult};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use metrics::AllActivityData;
pub use models::{ActivityRecord, AthleteProfile, Resolution, SessionSummary};
pub use sample_table::{SampleTable, StreamKind};
pub use service::{ActivityService, AllDataRequest, IntervalsResponse};
