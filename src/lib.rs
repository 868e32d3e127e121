pub mod app;

pub mod chain;

pub mod error;

pub mod model;

pub mod tx_parser;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
