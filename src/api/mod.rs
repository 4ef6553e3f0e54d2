//! Music service API client module

pub mod auth;
pub mod client;
pub mod models;

pub use auth::Credential;
pub use client::{LoginKind, MusicClient, PhoneCodeState, QrCode, QrPollState};
pub use models::*;
