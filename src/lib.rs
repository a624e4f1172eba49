pub mod alby;
pub mod boosts;
pub mod config;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod publisher;
pub mod server;
pub mod sources;
pub mod store;
pub mod token;
pub mod verifier;
