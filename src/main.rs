//! NoSqlDb operator - reconciles NoSqlDb resources

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use nosqldb_operator::config::OperatorConfig;
use nosqldb_operator::controller::{run_controller, Context, FIELD_MANAGER};
use nosqldb_operator::crd::NoSqlDb;
use nosqldb_operator::steps::deployment_tree;
use nosqldb_operator::telemetry::init_tracing;

/// NoSqlDb operator
#[derive(Parser, Debug)]
#[command(name = "nosqldb-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Only watch resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Do not apply the CRD on startup
    #[arg(long)]
    skip_crd_install: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&NoSqlDb::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let config = OperatorConfig::from_env()?;
    init_tracing(config.debug_log)?;
    tracing::info!(?config, "NoSqlDb operator starting");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if !cli.skip_crd_install {
        ensure_crd_installed(&client).await?;
    }

    let ctx = Context::<NoSqlDb>::builder(deployment_tree)
        .client(client.clone())
        .config(config)
        .build()?;

    run_controller(client, cli.namespace.as_deref(), Arc::new(ctx)).await;

    tracing::info!("NoSqlDb operator shutting down");
    Ok(())
}

/// Apply the NoSqlDb CRD so the controller's watch has something to list
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let crd = NoSqlDb::crd();
    let name = crd
        .metadata
        .name
        .clone()
        .ok_or_else(|| anyhow::anyhow!("generated CRD has no name"))?;

    tracing::info!(crd = %name, "Installing CRD");
    crds.patch(&name, &params, &Patch::Apply(&crd))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    Ok(())
}
