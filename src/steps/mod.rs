//! Leaf steps and the NoSqlDb deployment tree

mod pvc;
mod recycler;
mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;

pub use pvc::{CreatePvcStep, DEFAULT_ACCESS_MODE, PVC_NAMES};
pub use recycler::{
    recycler_labels, RecyclePvcStep, DEFAULT_RECYCLER_IMAGE, DEFAULT_RECYCLE_TIMEOUT, RECYCLER_POD,
};
pub use registry::{RegisterServicesStep, REGISTRY_SETTINGS_KEY};

use crate::crd::NoSqlDb;
use crate::engine::{
    DeployType, ExecutionContext, MicroServiceSequence, PvcDeployTypeClassifier, Sequence, Step,
    StepExt,
};
use crate::Result;

/// Labels shared by every claim of one database
pub fn storage_labels(db_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), db_name.to_string()),
        ("component".to_string(), "storage".to_string()),
    ])
}

/// Main deployment tree for a NoSqlDb
///
/// A single micro-service whose deploy type follows its existing claims:
/// storage first, volume scrubbing on a clean deploy, then service
/// registration.
pub fn deployment_tree(db: &NoSqlDb, _ctx: &ExecutionContext) -> Result<Box<dyn Step>> {
    let name = db.name_any();
    let labels = storage_labels(&name);
    let classifier = Arc::new(PvcDeployTypeClassifier::new(labels.clone()));

    let storage = CreatePvcStep::new(db.spec.storage.clone(), format!("{name}-data-{{}}"), labels)
        .count(db.spec.replicas as usize);
    let mut recycle = RecyclePvcStep::new(recycler_labels(&name));
    if let Some(image) = &db.spec.storage.recycler_image {
        recycle = recycle.image(image.clone());
    }
    let mut service = MicroServiceSequence::new(name, classifier)
        .then(storage)
        .then(recycle.only_on(DeployType::CleanDeploy));
    if let Some(registry) = &db.spec.registry {
        service = service.then(RegisterServicesStep::new(registry.services.clone()));
    }

    Ok(Box::new(Sequence::new("nosqldb").then(service)))
}
