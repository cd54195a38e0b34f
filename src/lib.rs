//! # Autofacts
//!
//! **A lazy generation and trust-lifecycle cache for AI-generated
//! automotive knowledge.**
//!
//! Every fact ("chunk") is computed once, verified through a multi-stage
//! quality process, and then served for free forever. The core is a
//! deterministic trust state machine deciding, for every unit of generated
//! content, whether it may ever be shown to an end user — combined with a
//! lazy cache that guarantees at most one authoritative version of a fact
//! per vehicle and never runs two generations for the same key.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │ resolve  │──▶│ Generator  │──▶│ QA Engine │──▶│ Promoter │
//! │ (cache)  │   │ (external) │   │ rules+LLM │   │ (trust)  │
//! └────┬─────┘   └────────────┘   └─────┬─────┘   └────┬─────┘
//!      │                                │              │
//!      ▼                                ▼              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            FactStore (SQLite, unique per key)           │
//! └─────────────────────────────┬───────────────────────────┘
//!                               │
//!                       ┌───────┴────────┐
//!                       │ Daily QA sched │
//!                       └────────────────┘
//! ```
//!
//! ## Trust lifecycle
//!
//! | State | Meaning |
//! |-------|---------|
//! | `unverified` | Fresh generation, quarantined |
//! | `candidate` | One passing QA evaluation |
//! | `verified` | Passes on two distinct calendar days |
//! | `banned` | Capped-out failures or a regression; terminal |
//!
//! Visibility is always derived from `qa_status` + `verified_status`
//! ([`models::Visibility::derive`]), never stored. A client receives
//! verified content, an explicit "verification in progress" or "rejected"
//! signal, or a transient-unavailability error. There is no fourth option.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Chunk record, status enums, derived visibility |
//! | [`vehicle`] | Vehicle-key normalization, content-id build/parse |
//! | [`store`] | `FactStore` trait + SQLite and in-memory backends |
//! | [`resolve`] | Lazy cache controller and generation pipeline |
//! | [`generator`] | Generator trait + OpenRouter implementation |
//! | [`qa`] | Rule-based checks + model-assisted checker seam |
//! | [`promote`] | Promotion/demotion state machine |
//! | [`scheduler`] | Daily review/repair cycle with persisted summaries |
//! | [`config`] | TOML configuration |
//! | [`error`] | `StoreError` / `GenerationError` taxonomy |

pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod get;
pub mod migrate;
pub mod models;
pub mod promote;
pub mod qa;
pub mod resolve;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod vehicle;
