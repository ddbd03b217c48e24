//! Send orchestration
//!
//! [`RelayService`] turns an EML file on disk into one Graph `sendMail` call:
//! it takes a send slot, resolves the sender, gets a token, streams the
//! message base64-encoded and maps the outcome to a [`crate::RelayError`].

mod service;

pub use service::{classify_failure, RelayService, SendOutcome};
