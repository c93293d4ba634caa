//! CLI command implementations

pub mod provision;
pub mod run;
pub mod validate;

pub use provision::ProvisionCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;
