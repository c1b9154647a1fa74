// src/lib.rs
//! LuckYou Wallet request relay.
//!
//! A page-side provider, a per-tab relay, the background coordinator and the
//! confirmation UI, each running as its own task and talking only through
//! messages and the durable store.

pub mod background;
pub mod blockchain;
pub mod core;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod runtime;
pub mod storage;
pub mod ui;
pub mod wallet;
