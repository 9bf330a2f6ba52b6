pub mod cli;
pub mod instances;
pub mod manifest;
