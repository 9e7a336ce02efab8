#![deny(clippy::mod_module_files)]
//! Offline-first study progress with multi-device sync.
//!
//! [`store::LocalStore`] is the authoritative local copy. [`sync::SyncEngine`]
//! reconciles it with a remote versioned blob through
//! [`remote::SyncAdapter`] and [`merge::merge`], and [`tracker::ChangeTracker`]
//! runs sync cycles as local edits settle. The question catalog
//! ([`catalog`]) and answer drafts ([`drafts`]) are separate, read-only and
//! local-only respectively.

pub mod catalog;
pub mod config;
pub mod drafts;
pub mod error;
pub mod merge;
pub mod model;
pub mod remote;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tracker;
