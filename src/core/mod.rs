pub mod agents;
pub mod bus;
pub mod config;
pub mod gateway;
pub mod interview;
pub mod jobs;
pub mod lifecycle;
pub mod prompts;
pub mod router;
pub mod store;
pub mod terminal;
