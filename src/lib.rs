//! NoSqlDb operator - reconciliation engine for a stateful database service
//!
//! The operator watches `NoSqlDb` resources and drives each one toward its
//! desired state with a tree of deployment steps.
//!
//! # Architecture
//!
//! - Every resource event runs one reconcile pass
//! - A pass hashes the desired spec and compares it with the digest persisted
//!   in a per-resource ConfigMap; unchanged specs do no work
//! - Deployment logic is a tree of [`engine::Step`]s grouped into
//!   micro-service sequences that classify themselves as clean deploy or
//!   update from the claims already in the cluster
//! - The outcome of each pass, including panics, lands in the resource status
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions and status types
//! - [`controller`] - Reconcile pass, controller context and runtime wiring
//! - [`engine`] - Execution context, step protocol, deploy types, change detection
//! - [`steps`] - Leaf steps and the NoSqlDb deployment tree
//! - [`store`] - Cluster and spec-hash record access
//! - [`clients`] - Secret store and service registry boundaries
//! - [`credentials`] - Admin secret rotation tracking
//! - [`config`] - Operator settings read from the environment
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod clients;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod crd;
pub mod engine;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod steps;
pub mod store;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
