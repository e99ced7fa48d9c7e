//! Library crate for portprobe: a bounded-concurrency TCP port scanner.
pub mod cursor;
pub mod error;
pub mod limits;
pub mod ports;
pub mod report;
pub mod scanner;
pub mod types;
