use std::fmt;

use log::info;
use serde_json::Value;

use super::proto::{self, typed_value};
use super::{parse_path, Client, GnmiError, Result};

/// A gNMI Set operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    Update,
    Replace,
    Delete,
}

impl SetOperation {
    /// Unknown operation names fail fast with an error naming the operation.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "update" => Ok(SetOperation::Update),
            "replace" => Ok(SetOperation::Replace),
            "delete" => Ok(SetOperation::Delete),
            other => Err(GnmiError::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for SetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetOperation::Update => "update",
            SetOperation::Replace => "replace",
            SetOperation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One update/replace/delete item of a Set request.
#[derive(Debug, Clone)]
pub struct SetItem {
    pub operation: SetOperation,
    pub path: String,
    /// Serialized to IETF JSON; delete items carry no value.
    pub value: Option<Value>,
}

impl Client {
    /// Performs a gNMI Set with update, replace, and delete sub-requests.
    pub async fn set(&mut self, items: &[SetItem]) -> Result<proto::SetResponse> {
        let mut request = proto::SetRequest::default();

        for item in items {
            let path = parse_path(&item.path);
            match item.operation {
                SetOperation::Update => request.update.push(proto::Update {
                    path: Some(path),
                    val: Some(encode_value(item.value.as_ref().unwrap_or(&Value::Null))?),
                    duplicates: 0,
                }),
                SetOperation::Replace => request.replace.push(proto::Update {
                    path: Some(path),
                    val: Some(encode_value(item.value.as_ref().unwrap_or(&Value::Null))?),
                    duplicates: 0,
                }),
                SetOperation::Delete => request.delete.push(path),
            }
        }

        let updates = request.update.len();
        let replaces = request.replace.len();
        let deletes = request.delete.len();

        let timeout = self.timeout();
        let response = tokio::time::timeout(timeout, self.grpc()?.set(request))
            .await
            .map_err(|_| GnmiError::Timeout(timeout))?
            .map_err(|source| GnmiError::Rpc {
                context: "gNMI Set failed",
                source,
            })?;

        info!("gNMI Set completed: updates={updates} replaces={replaces} deletes={deletes}");
        Ok(response.into_inner())
    }
}

/// Wraps a JSON value in the IETF-JSON typed-value variant.
pub(super) fn encode_value(value: &Value) -> Result<proto::TypedValue> {
    let bytes = serde_json::to_vec(value)?;
    Ok(proto::TypedValue {
        value: Some(typed_value::Value::JsonIetfVal(bytes)),
    })
}
