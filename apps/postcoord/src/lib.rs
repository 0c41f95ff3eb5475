//! # postcoord
//!
//! Command line front end for the post-coordinated expression repository.
//!
//! - `cli`: clap commands over a redb-backed repository
//! - `config`: TOML configuration of the module, terms and range rules

pub mod cli;
pub mod config;
