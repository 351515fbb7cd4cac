//! Rentwise booking lifecycle and escrow settlement engine
//!
//! Moves equipment rental bookings through their lifecycle, holds the
//! renter's money in escrow until inspections allow release, issues refunds
//! on cancellation, and streams changes to interested clients.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
