//! Validate command - check the resolved configuration

use anyhow::Context;
use catalog_etl_config::PipelineConfig;
use clap::Args;

/// Validate and optionally print the resolved configuration
#[derive(Args, Debug, Clone)]
pub struct ValidateCommand {
    /// Print the resolved configuration as JSON
    #[arg(long)]
    pub print: bool,
}

impl ValidateCommand {
    pub fn execute(&self, config: &PipelineConfig) -> anyhow::Result<()> {
        config.validate().context("invalid configuration")?;

        if self.print {
            let mut redacted = config.clone();
            if let Some(trust_store) = redacted.kafka.trust_store.as_mut() {
                if trust_store.password.is_some() {
                    trust_store.password = Some("***".to_string());
                }
            }
            if redacted.publish.access_token.is_some() {
                redacted.publish.access_token = Some("***".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&redacted)?);
        } else {
            println!("Configuration is valid");
        }
        Ok(())
    }
}
