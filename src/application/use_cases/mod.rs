pub mod billing;
pub mod notices;
pub mod plan_catalog;
pub mod reconciliation;
pub mod subscription;
pub mod webhook;
