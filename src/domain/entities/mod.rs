pub mod analytics;
pub mod billing_event;
pub mod payment_provider;
pub mod payment_record;
pub mod plan;
pub mod subscription;
