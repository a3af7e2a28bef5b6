// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Layered configuration schema for the `paseo` daemon.
//!
//! Resolution order (lowest to highest priority): built-in defaults, then
//! `/etc/paseo/config.yaml`, then `~/.config/paseo/config.yaml`, then an
//! explicit `--config` path, then individual CLI flags applied by the
//! binary after loading.

mod loader;
mod schema;

pub use loader::load;
pub use schema::{Config, RelayConfig};
