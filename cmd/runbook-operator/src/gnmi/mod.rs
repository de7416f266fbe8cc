//! gNMI client for device configuration and telemetry RPCs.

mod client;
mod get;
mod set;
mod subscribe;

use thiserror::Error;

pub use client::{Client, TlsOptions};
pub use get::response_to_json;
pub use set::{SetItem, SetOperation};
pub use subscribe::parse_subscribe_mode;

/// Generated gNMI protocol types.
pub mod proto {
    tonic::include_proto!("gnmi");
}

pub type Result<T> = std::result::Result<T, GnmiError>;

#[derive(Error, Debug)]
pub enum GnmiError {
    /// Device connections are TLS-only; a client without TLS material
    /// refuses to dial.
    #[error("TLS configuration is required for gNMI connections to {0}")]
    TlsRequired(String),

    #[error("client not connected")]
    NotConnected,

    #[error("invalid target address {0}")]
    Address(String),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: tonic::transport::Error,
    },

    #[error("reading TLS material: {0}")]
    TlsRead(#[from] std::io::Error),

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{context}: {source}")]
    Rpc {
        context: &'static str,
        source: tonic::Status,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Splits a path string on `/`; empty segments collapse and the root path
/// (`""` or `"/"`) yields the empty element list. Bracketed keys are not
/// parsed at this layer; callers pass fully-resolved paths.
pub fn parse_path(path: &str) -> proto::Path {
    let mut parsed = proto::Path::default();
    if path.is_empty() || path == "/" {
        return parsed;
    }
    for elem in path.split('/') {
        if !elem.is_empty() {
            parsed.elem.push(proto::PathElem {
                name: elem.to_string(),
                key: Default::default(),
            });
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(path: &str) -> Vec<String> {
        parse_path(path).elem.into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn parse_path_normalizes() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(names(""), empty);
        assert_eq!(names("/"), empty);
        assert_eq!(names("a/b"), vec!["a", "b"]);
        assert_eq!(names("/a/b"), vec!["a", "b"]);
        assert_eq!(names("/a//b"), vec!["a", "b"]);
        assert_eq!(names("/a/b/"), vec!["a", "b"]);
    }

    #[test]
    fn parse_path_keeps_resolved_keys_verbatim() {
        assert_eq!(
            names("/interfaces/interface[name=Ethernet1]/state"),
            vec!["interfaces", "interface[name=Ethernet1]", "state"]
        );
    }
}
