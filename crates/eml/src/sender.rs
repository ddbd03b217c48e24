//! Sender extraction
//!
//! Finds the originating mailbox of a message by scanning its `Sender:` and
//! `From:` headers. Only the header section is read.

use crate::address::Address;
use crate::header::HeaderReader;
use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};

lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"<\s*([^<>\s]+@[^<>\s]+?)\s*>").unwrap();
    static ref BARE: Regex =
        Regex::new(r"[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?")
            .unwrap();
}

/// Extract the sender of the message stored at `path`
///
/// The file is closed before this returns, whatever the outcome.
pub async fn extract_sender(path: impl AsRef<Path>) -> io::Result<Option<Address>> {
    let file = File::open(path.as_ref()).await?;
    sender_from_reader(BufReader::new(file)).await
}

/// Extract the sender from a buffered reader positioned at the first header
///
/// Returns the address of the first `Sender:` or `From:` header (matched
/// case-insensitively) that yields a parseable mailbox. Headers whose value
/// does not parse are skipped. Scanning stops at the end of the header
/// section.
pub async fn sender_from_reader<R>(reader: R) -> io::Result<Option<Address>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HeaderReader::new(reader);

    while let Some(line) = headers.next_header().await? {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        let name = name.trim();
        if !name.eq_ignore_ascii_case("sender") && !name.eq_ignore_ascii_case("from") {
            continue;
        }

        if let Some(address) = parse_mailbox(value) {
            return Ok(Some(address));
        }
    }

    Ok(None)
}

/// Pick a mailbox out of a header value
///
/// An address in angle brackets wins over a bare `local@domain` token. When
/// neither pattern matches the whole value is tried as-is, which fails for
/// anything that is not already a plain address.
pub fn parse_mailbox(value: &str) -> Option<Address> {
    let candidate = BRACKETED
        .captures(value)
        .and_then(|captures| captures.get(1))
        .or_else(|| BARE.find(value))
        .map(|m| m.as_str())
        .unwrap_or(value);

    candidate.parse().ok()
}
