pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod notify;
pub mod partition;
pub mod process;
pub mod queue;
pub mod storage;
pub mod util;
pub mod worker;
