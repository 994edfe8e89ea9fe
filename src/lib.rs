// Settings, env overrides and store path resolution
pub mod config;

// Error taxonomy
pub mod error;

// PKCE verifier/challenge
pub mod pkce;

// Machine-bound key derivation
pub mod fingerprint;

// Encrypted credential store
pub mod credentials;

// Token and revoke endpoint client
pub mod exchange;

// Loopback redirect listener
pub mod callback;

// Browser login orchestration
pub mod flow;

// has/get/execute/revoke facade
pub mod session;

pub use config::CloudConfig;
pub use error::AuthError;
pub use session::{CloudAuth, TokenStatus};
