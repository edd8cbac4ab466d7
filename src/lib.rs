pub mod collector;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod format;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod shutdown;
pub mod storage;
