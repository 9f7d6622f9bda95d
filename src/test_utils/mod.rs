//! Test utilities for integration testing.
//!
//! This module provides:
//! - Test data factories for creating valid test fixtures
//! - In-memory repository implementations for mocking persistence
//! - Scriptable gateway, notifier and clock doubles
//! - Builders wiring the use cases (and `AppState`) over those mocks

mod app_state_builder;
mod billing_mocks;
mod factories;
mod gateway_mocks;

pub use app_state_builder::*;
pub use billing_mocks::*;
pub use factories::*;
pub use gateway_mocks::*;
