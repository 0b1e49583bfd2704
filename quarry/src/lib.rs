//! # Quarry - Collection Storage Layer
//!
//! Quarry is the layer of a document database that sits between the catalog
//! and the storage engine. It turns document writes into record, index and
//! replication-log writes, keeps collection metadata consistent while readers
//! hold on to older versions of it, and bounds capped collections.
//!
//! ## Key Features
//!
//! - **Copy-on-write generations**: catalog changes build a new
//!   [`CollectionGeneration`](collection::CollectionGeneration) while readers
//!   keep the old one
//! - **Document validation**: validators with strict and moderate levels, and
//!   error and warn actions
//! - **Capped collections**: size and document caps with resumable eviction
//! - **Transactional writes**: every write runs in a unit of work and undoes
//!   itself through rollback hooks
//! - **Pluggable collaborators**: record stores, index catalogs, durable
//!   catalogs and log observers are traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quarry::catalog::{CollectionOptions, Namespace};
//! use quarry::collection::{CollectionServices, VersionedCollection};
//! use quarry::observer::InsertStatement;
//! use quarry::store::InMemoryRecordStore;
//! use quarry::transaction::TransactionContext;
//! use quarry::doc;
//! use std::sync::Arc;
//!
//! # fn main() -> quarry::errors::QuarryResult<()> {
//! let services = CollectionServices::default();
//! let txn = TransactionContext::new();
//! let ns = Namespace::new("app", "events");
//! let events = VersionedCollection::create(
//!     &txn,
//!     &services,
//!     &ns,
//!     &CollectionOptions::new().capped(1 << 20, 1000),
//!     Arc::new(InMemoryRecordStore::new("events")),
//! )?;
//!
//! txn.unit_of_work(|txn| {
//!     events.write(txn, |generation| {
//!         generation.insert_document(txn, InsertStatement::new(doc! { _id: 1, kind: "login" }), None, false)
//!     })
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`catalog`] - Namespaces, collection options and the durable catalog
//! - [`collection`] - Generations, shared state, writes and capped eviction
//! - [`common`] - Locks, fail points, decorations and shared type aliases
//! - [`document`] - Documents, record ids and in-place update damages
//! - [`errors`] - Error types and result definitions
//! - [`index`] - Index specs and the index coordinator
//! - [`observer`] - Replication log observers
//! - [`quarry_config`] - Process-wide settings
//! - [`store`] - Record store abstraction and the in-memory store
//! - [`transaction`] - Units of work, snapshots and commit/rollback hooks
//! - [`validation`] - Validators and the predicate compiler

pub mod catalog;
pub mod collection;
pub mod common;
pub mod document;
pub mod errors;
pub mod index;
pub mod observer;
pub mod quarry_config;
pub mod store;
pub mod transaction;
pub mod validation;

#[doc(hidden)]
pub use serde_json as __serde_json;
