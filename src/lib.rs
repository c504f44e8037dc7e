//! # Incident RCA
//!
//! A semantic cache and idempotent pipeline for incident root-cause
//! analyses and remediation plans.
//!
//! Incidents arrive from a ticketing export, move through an analysis and
//! a solution stage, and reuse the artifacts of a sufficiently similar and
//! recent past incident instead of calling a model again. The
//! provider-independent logic lives in [`incident_rca_core`]; this crate
//! supplies SQLite storage, embedding and generation providers, and the
//! `rca` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │  Intake     │──▶│  Pipeline        │──▶│  SQLite   │
//! │  JSON file  │   │ claim+cache+gen  │   │ incidents │
//! └─────────────┘   └────────┬─────────┘   │ solutions │
//!                            │             └──────────┘
//!                  ┌─────────┴─────────┐
//!                  ▼                   ▼
//!             ┌──────────┐       ┌──────────┐
//!             │ Embedder │       │Generator │
//!             │hash/api  │       │ template │
//!             └──────────┘       │ /api     │
//!                                └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rca init                          # create database
//! rca intake incidents.json         # ingest new incidents
//! rca process --pending             # run analysis and solution stages
//! rca show INC0012345
//! rca lookup "disk full on db node" # would this reuse a past incident?
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite incident and solution stores |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Analysis and solution generators |
//! | [`runner`] | Store and provider wiring, batch runs |
//! | [`intake`] | `rca intake` |
//! | [`process`] | `rca process` |
//! | [`lookup`] | `rca lookup` |
//! | [`show`] | `rca show` |
//! | [`list`] | `rca list` |
//! | [`stats`] | `rca stats` |

pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod intake;
pub mod list;
pub mod logging;
pub mod lookup;
pub mod migrate;
pub mod process;
pub mod progress;
pub mod runner;
pub mod show;
pub mod sqlite_store;
pub mod stats;
