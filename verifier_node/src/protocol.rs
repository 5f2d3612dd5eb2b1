//! Attestation wire protocol.
//!
//! The server sends a bare three-byte request marker. The client answers with
//! `MODS|` followed by a comma-separated list of installed mod identifiers.
//! Anything else arriving on the channel is not an attestation and is ignored.

use crate::config::normalize_identifier;
use bytes::Bytes;
use std::collections::BTreeSet;

/// Channel name the host routes verifier traffic on.
pub const CHANNEL: &str = "lakshay:verify";

/// Outbound request marker.
pub const REQUEST_MARKER: &[u8; 3] = b"REQ";

/// Prefix tagging an attestation payload.
pub const REPORT_PREFIX: &str = "MODS|";

/// Decoded attestation: the normalized set of reported identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestationReport {
    mods: BTreeSet<String>,
}

impl AttestationReport {
    pub fn new<I, S>(mods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mods = mods
            .into_iter()
            .map(|m| normalize_identifier(m.as_ref()))
            .filter(|m| !m.is_empty())
            .collect();
        Self { mods }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.mods.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.mods.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

/// Request payload sent to the client.
pub fn encode_request() -> Bytes {
    Bytes::from_static(REQUEST_MARKER)
}

/// Returns true if `payload` is the request marker.
pub fn is_request(payload: &[u8]) -> bool {
    payload == REQUEST_MARKER
}

/// Decode an inbound payload.
///
/// Returns `None` for anything that is not an attestation, including invalid
/// UTF-8. An attestation with no identifiers decodes to an empty report.
pub fn decode(payload: &[u8]) -> Option<AttestationReport> {
    let text = std::str::from_utf8(payload).ok()?;
    let list = text.strip_prefix(REPORT_PREFIX)?.trim();
    Some(AttestationReport::new(list.split(',')))
}

/// Wire form of a report, as a client would send it.
pub fn encode_report<I, S>(mods: I) -> Bytes
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let list: Vec<String> = mods.into_iter().map(|m| m.as_ref().to_string()).collect();
    Bytes::from(format!("{}{}", REPORT_PREFIX, list.join(",")))
}
