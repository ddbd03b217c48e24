//! Inspect an EML file: resolved sender and encoded size
//!
//! To run this example:
//! ```sh
//! cd crates/eml
//! cargo run --example inspect -- path/to/message.eml
//! ```

use eml::{encoded_len, extract_sender};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: inspect <message.eml>");
        std::process::exit(2);
    };

    match extract_sender(&path).await? {
        Some(sender) => println!("Sender:        {}", sender),
        None => println!("Sender:        (none before end of headers)"),
    }

    let size = tokio::fs::metadata(&path).await?.len();
    println!("Raw size:      {} bytes", size);
    println!("Encoded size:  {} bytes", encoded_len(size));

    Ok(())
}
