pub mod config;
pub mod error;
pub mod output;
pub mod parser;
pub mod storage;
pub mod workload;
