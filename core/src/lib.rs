//! Fraud-case triage engine.
//!
//! A case flows extractor → planner → executor → aggregator →
//! classifier adapter → rule engine → cache, driven by the
//! `InvestigationEngine`. Batches of cases go through `BatchRunner`.

pub mod aggregator;
pub mod batch;
pub mod cache;
pub mod case;
pub mod classifier;
pub mod collaborator;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod evidence;
pub mod executor;
pub mod extractor;
pub mod outcome;
pub mod planner;
pub mod rules;
pub mod store;
pub mod testkit;
pub mod timeout;
pub mod types;
pub mod verdict;

pub use engine::{InvestigateOptions, InvestigationEngine};
pub use error::{TriageError, TriageResult};
