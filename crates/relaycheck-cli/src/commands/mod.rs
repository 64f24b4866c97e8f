pub mod cache;
pub mod check;
pub mod config;
