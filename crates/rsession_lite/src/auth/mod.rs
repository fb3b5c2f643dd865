//! Authentication and authorization.
//!
//! A [`CredentialStore`] turns setup credentials into a [`Principal`] once per
//! session; the [`AuthorizationGate`] then decides, once per stream-open,
//! whether that principal may invoke a route.

mod gate;
mod principal;
mod store;

pub use gate::{AccessRule, AuthorizationGate, Decision};
pub use principal::Principal;
pub use store::{CredentialStore, InMemoryCredentialStore};
