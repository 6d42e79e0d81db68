//! `patrol-cli` – shared pieces of the `patrol` and `patrol-intake` binaries.
//!
//! - [`config`] – the TOML file both binaries read, with `PATROL_*`
//!   environment overrides.

pub mod config;
