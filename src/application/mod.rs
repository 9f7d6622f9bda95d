pub mod app_error;
pub mod clock;
pub mod email_templates;
pub mod locks;
pub mod ports;
pub mod use_cases;
pub mod validators;
