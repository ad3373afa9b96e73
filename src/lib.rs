// Library for tests to access modules

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod settings;
