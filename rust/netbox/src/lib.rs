//! NetBox inventory client shared by the Helios collection services.
//!
//! The target synchronizer and the flow enricher both page through the same
//! inventory endpoints; this crate holds the client, the flattened record
//! types, and the device-metadata map builder used by the enrichment cache.

mod client;
mod error;
mod model;

pub use client::Client;
pub use error::{Error, Result};
pub use model::{Device, DeviceMetadata, Interface, InterfaceMetadata};

/// Strips a routing-prefix suffix from a management address.
///
/// `"10.0.0.1/32"` → `"10.0.0.1"`, `"10.0.0.1"` → `"10.0.0.1"`, `""` → `""`.
pub fn strip_cidr(addr: &str) -> &str {
    match addr.find('/') {
        Some(idx) => &addr[..idx],
        None => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_cidr_removes_prefix() {
        assert_eq!(strip_cidr("10.0.0.1/32"), "10.0.0.1");
        assert_eq!(strip_cidr("10.0.0.1"), "10.0.0.1");
        assert_eq!(strip_cidr(""), "");
        assert_eq!(strip_cidr("2001:db8::1/64"), "2001:db8::1");
    }
}
