//! Stories about the Kubernetes-backed collaborators
//!
//! - `hash_store`: the spec-hash record kept in a ConfigMap
//! - `credentials`: digest stamping on the admin secret
//! - `status`: status writes on a NoSqlDb resource
//! - `cluster_store`: claim creation racing another writer
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod credentials;
mod hash_store;
mod helpers;
