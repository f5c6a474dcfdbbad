pub mod api;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod models;
pub mod portfolio;
pub mod pricing;
pub mod utils;

pub use error::{Error, Result};
