//! Supabase collaborators for the session sync core.
//!
//! This crate provides:
//! - `SupabaseIdentityProvider`: password sign-in, sign-up, refresh, and
//!   sign-out against Supabase Auth, with tokens persisted locally
//! - `SupabaseProfileStore`: profile reads and writes over PostgREST

mod error;
mod http;
mod identity;
mod profiles;

pub use error::{GatewayError, GatewayResult};
pub use identity::{StoredSession, SupabaseIdentityProvider};
pub use profiles::{role_table, SupabaseProfileStore};
