// src/lib.rs

//! Timeline Harvester Library

pub mod config;
pub mod driver;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
