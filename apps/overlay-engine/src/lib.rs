// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Overlay Engine - Rust Core Library
//!
//! The hybrid waterfall calculation engine for the Overlay P&L system:
//! given a ledger of P&L facts and a business hierarchy over them, it
//! applies analyst override rules, re-rolls the hierarchy, and reconciles
//! the result against the untouched ledger so every dollar is accounted
//! for. Each node carries three values per measure: Natural (raw rollup),
//! Adjusted (rollup under rules), and Plug (Natural − Adjusted).
//!
//! # Architecture (Clean Architecture + DDD)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: entities and value objects
//!   - `use_case`, `hierarchy`, `fact`, `rule`, `run`, measure vectors
//! - **Engine**: the calculation core
//!   - rule resolver, predicate conversion, expression evaluation,
//!     dependency ordering, natural rollup, waterfall stages, plug,
//!     reconciliation, pipeline
//! - **Application**: operator verbs and store ports
//!   - `ports`: `FactStorePort`, `HierarchyStorePort`, `RuleStorePort`,
//!     `UseCaseStorePort`, `ResultStorePort` (each with an in-memory fake)
//!   - `use_cases`: Calculate, GetResults, ListRuns, PreviewRule,
//!     ResolveRuleStack
//! - **Infrastructure**: turso store adapters, TTL caches, wiring

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Layers
// =============================================================================

/// Domain layer - entities and value objects with no external dependencies.
pub mod domain;

/// Calculation core - resolver, stages, reconciliation, pipeline.
pub mod engine;

/// Application layer - operator verbs and port definitions.
pub mod application;

/// Infrastructure layer - turso adapters and caches.
pub mod infrastructure;

/// Run-level error taxonomy.
pub mod error;

/// YAML configuration with env interpolation.
pub mod config;

/// Logging initialisation.
pub mod observability;

// =============================================================================
// Re-exports
// =============================================================================

// Domain re-exports
pub use domain::{
    CalculatedResult, CalculationRun, ExecutableRule, FactRow, FactSchema, Hierarchy,
    HierarchyNode, MeasureMapping, MeasureVector, Rule, RuleBody, RuleKind, RunStatus, UseCase,
    UseCaseStatus,
};

// Engine re-exports
pub use engine::{CalculationPipeline, PipelineConfig, RunOutcome, RunRequest};
pub use error::CalcError;

// Application re-exports
pub use application::Stores;
pub use application::use_cases::{
    CalculateCommand, GetResultsUseCase, ListRunsUseCase, NodeTree, PreviewRuleUseCase,
    ResolveRuleStackUseCase, RunCalculationUseCase,
};

// Infrastructure re-exports
pub use infrastructure::Container;
