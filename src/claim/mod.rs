//! Server claims
//!
//! Login, the external claim API, and the requestor that reduces every
//! claim outcome to an address or absence.

pub mod auth;
pub mod requestor;
pub mod service;

pub use auth::{AccessToken, ClientCredentialsAuthenticator};
pub use requestor::{AllocationRequestor, ClaimMode, DIAGNOSTIC_SESSION_ID};
pub use service::{AmsClaimClient, ClaimService};
