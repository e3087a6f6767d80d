pub mod audit;
pub mod error;
pub mod rule_catalog;
