//! Secret types for values that must never reach logs.
//!
//! Re-exports the [`secrecy`] types. Connection strings that may embed
//! credentials (for example `redis://:password@host:6379`) are held as
//! [`SecretString`] so that deriving `Debug` on a config struct is safe.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let url = SecretString::from("redis://:hunter2@cache:6379");
//! assert!(!format!("{url:?}").contains("hunter2"));
//! assert!(url.expose_secret().starts_with("redis://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
