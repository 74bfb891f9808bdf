pub mod commands;
pub mod config;
pub mod error;
pub mod fs;
pub mod image;
pub mod propagate;
