//! Core types shared by every component: configuration, host list parsing,
//! and the error taxonomy.

pub mod config;
pub mod errors;
pub mod hosts;
