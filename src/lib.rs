// For integration tests only, chatrelay does binary-only packaging
pub mod bridge;
pub mod broker;
pub mod cache;
pub mod chat;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod ingress;
pub mod logging;
pub mod message;
pub mod nats;
pub mod publish;
