pub mod announcer;
pub mod config;
pub mod error;
pub mod remote_store;
pub mod storage;
