//! Stories about how the controller reacts to NoSqlDb events
//!
//! # Test Organization
//!
//! - `lifecycle`: first deploys, no-op passes, failures and their recovery,
//!   disaster recovery and the version gate
//! - `credentials`: admin secret watches and rotation handling
//! - `fakes`: in-memory stand-ins for the cluster, the spec-hash record,
//!   the resource API, process control and the credential watcher

mod credentials;
mod fakes;
