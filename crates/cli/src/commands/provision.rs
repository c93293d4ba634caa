//! Provision command - fetch the trust store without starting the pipeline

use anyhow::Context;
use catalog_etl_config::PipelineConfig;
use clap::Args;
use processor::provision::provision_trust_store;

/// Materialize the configured trust store
#[derive(Args, Debug, Clone)]
pub struct ProvisionCommand {}

impl ProvisionCommand {
    pub async fn execute(&self, config: &PipelineConfig) -> anyhow::Result<()> {
        let path = provision_trust_store(config.kafka.trust_store.as_ref())
            .await
            .context("trust store provisioning failed")?;

        match path {
            Some(path) => println!("Trust store ready at {}", path.display()),
            None => println!("No trust store configured"),
        }
        Ok(())
    }
}
