//! crossword-core: the point economy behind a cooperative crossword game.
//!
//! Layers, leaves first:
//!   store       SQLite; the only module that runs SQL
//!   ledger      balances and grant sets
//!   completion  at-most-once rewards for solved rows and vertical words
//!   request     moderated hint purchases and submissions
//!   feed        full-snapshot change propagation
//!   client      optimistic client state and its reconciliation
//!   api         authenticated, validated entry point

pub mod api;
pub mod client;
pub mod clock;
pub mod command;
pub mod completion;
pub mod config;
pub mod economy;
pub mod error;
pub mod event;
pub mod feed;
pub mod ledger;
pub mod request;
pub mod snapshot;
pub mod store;
pub mod types;
