pub mod config;
pub mod feed;
pub mod job;
pub mod lock;
pub mod pipeline;
pub mod prepare;
pub mod process;
pub mod publish;
pub mod schedule;
pub mod sink;
pub mod store;
