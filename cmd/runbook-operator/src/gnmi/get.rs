use std::time::Duration;

use log::{info, warn};
use serde_json::{json, Value};

use super::proto::{self, get_request, typed_value, Encoding};
use super::{parse_path, Client, GnmiError, Result};

impl Client {
    /// Performs a single Get for the given paths with encoding JSON_IETF and
    /// data type ALL.
    pub async fn get(&mut self, paths: &[String]) -> Result<proto::GetResponse> {
        let request = proto::GetRequest {
            prefix: None,
            path: paths.iter().map(|p| parse_path(p)).collect(),
            r#type: get_request::DataType::All as i32,
            encoding: Encoding::JsonIetf as i32,
        };

        let timeout = self.timeout();
        let response = tokio::time::timeout(timeout, self.grpc()?.get(request))
            .await
            .map_err(|_| GnmiError::Timeout(timeout))?
            .map_err(|source| GnmiError::Rpc {
                context: "gNMI Get failed",
                source,
            })?
            .into_inner();

        info!(
            "gNMI Get completed: paths={} notifications={}",
            paths.len(),
            response.notification.len()
        );
        Ok(response)
    }

    /// Repeats Get at the given interval until the predicate is satisfied or
    /// the client timeout elapses.
    pub async fn poll<F>(
        &mut self,
        paths: &[String],
        interval: Duration,
        mut done: F,
    ) -> Result<proto::GetResponse>
    where
        F: FnMut(&proto::GetResponse) -> bool,
    {
        let deadline = tokio::time::Instant::now() + self.timeout();

        loop {
            tokio::time::sleep(interval).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(GnmiError::Timeout(self.timeout()));
            }

            match self.get(paths).await {
                Ok(response) => {
                    if done(&response) {
                        return Ok(response);
                    }
                }
                Err(e) => warn!("poll attempt failed: {e}"),
            }
        }
    }
}

/// Digests a Get response into JSON for step output recording.
pub fn response_to_json(response: &proto::GetResponse) -> Value {
    let notifications: Vec<Value> = response
        .notification
        .iter()
        .map(|n| {
            let updates: Vec<Value> = n
                .update
                .iter()
                .map(|u| {
                    json!({
                        "path": u.path.as_ref().map(path_to_string).unwrap_or_default(),
                        "value": u.val.as_ref().map(typed_value_to_json).unwrap_or(Value::Null),
                    })
                })
                .collect();
            json!({"timestamp": n.timestamp, "updates": updates})
        })
        .collect();
    json!({ "notifications": notifications })
}

fn path_to_string(path: &proto::Path) -> String {
    let mut out = String::new();
    for elem in &path.elem {
        out.push('/');
        out.push_str(&elem.name);
    }
    out
}

fn typed_value_to_json(value: &proto::TypedValue) -> Value {
    match &value.value {
        Some(typed_value::Value::JsonIetfVal(bytes)) | Some(typed_value::Value::JsonVal(bytes)) => {
            serde_json::from_slice(bytes).unwrap_or(Value::Null)
        }
        Some(typed_value::Value::StringVal(s)) => Value::String(s.clone()),
        Some(typed_value::Value::AsciiVal(s)) => Value::String(s.clone()),
        Some(typed_value::Value::IntVal(i)) => json!(i),
        Some(typed_value::Value::UintVal(u)) => json!(u),
        Some(typed_value::Value::BoolVal(b)) => json!(b),
        Some(typed_value::Value::DoubleVal(d)) => json!(d),
        Some(typed_value::Value::BytesVal(_)) | None => Value::Null,
    }
}
