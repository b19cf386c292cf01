pub mod assemble;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod harness;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod store;
pub mod timestamp;
