//! # Spatial Harvest
//!
//! A harvester for GEMINI / ISO 19139 geospatial metadata.
//!
//! Spatial Harvest pulls metadata documents from CSW catalog services,
//! single static documents and web-accessible folders (WAFs), and reconciles
//! each document against the history of earlier harvests before writing a
//! catalog entry for it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Adapters   │──▶│ Reconciliation │──▶│   Catalog    │
//! │ CSW/Doc/WAF │   │    engine      │   │   entries    │
//! └─────────────┘   └───────┬───────┘   └──────────────┘
//!                           │
//!                           ▼
//!                    ┌──────────────┐
//!                    │ Record store │
//!                    │   (SQLite)   │
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest init                  # create database
//! harvest sources               # list configured sources
//! harvest run waf:rivers        # harvest one source
//! harvest run all               # harvest every source concurrently
//! harvest report <job-id>       # what a job did, item by item
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors per pipeline stage |
//! | [`gemini`] | GEMINI document reading |
//! | [`validation`] | Validator profiles |
//! | [`connector_csw`] | CSW source adapter |
//! | [`connector_doc`] | Single-document source adapter |
//! | [`connector_waf`] | Web-accessible folder source adapter |
//! | [`reconcile`] | Create / update / skip / reject decisions |
//! | [`payload`] | Catalog entry payload construction |
//! | [`probe`] | Map-service detection |
//! | [`store`] | Storage traits and the in-memory backend |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`ingest`] | Job orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_csw;
pub mod connector_doc;
pub mod connector_waf;
pub mod csw;
pub mod db;
pub mod error;
pub mod gemini;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod payload;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod sources;
pub mod sqlite_store;
pub mod store;
pub mod traits;
pub mod validation;
