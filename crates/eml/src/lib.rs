//! Streaming helpers for raw RFC822 (EML) messages
//!
//! Nothing in this crate loads a whole message into memory. Headers are read
//! line by line until the header/body boundary, and message bodies are
//! base64-encoded chunk by chunk as they are read from disk.
//!
//! # Example
//!
//! ```no_run
//! use eml::extract_sender;
//!
//! # async fn run() -> std::io::Result<()> {
//! match extract_sender("queue/0001.eml").await? {
//!     Some(sender) => println!("sender: {}", sender),
//!     None => println!("no sender header"),
//! }
//! # Ok(())
//! # }
//! ```

mod address;
mod encode;
mod header;
mod sender;

pub use address::{Address, AddressError};
pub use encode::{base64_stream, base64_stream_with_chunk_size, encoded_len, DEFAULT_CHUNK_SIZE};
pub use header::HeaderReader;
pub use sender::{extract_sender, parse_mailbox, sender_from_reader};
