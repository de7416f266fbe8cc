use log::info;

use super::proto::{
    self, subscribe_request, subscription_list, Encoding, SubscriptionMode,
};
use super::{parse_path, Client, GnmiError, Result};

/// Parses a subscription mode name from a step config.
pub fn parse_subscribe_mode(s: &str) -> Option<subscription_list::Mode> {
    match s.to_ascii_uppercase().as_str() {
        "STREAM" => Some(subscription_list::Mode::Stream),
        "ONCE" => Some(subscription_list::Mode::Once),
        "POLL" => Some(subscription_list::Mode::Poll),
        _ => None,
    }
}

impl Client {
    /// Opens a bidirectional subscription stream and invokes the handler for
    /// each response until EOF or error. Sub-mode is target-defined.
    pub async fn subscribe<F>(
        &mut self,
        paths: &[String],
        mode: subscription_list::Mode,
        mut handler: F,
    ) -> Result<()>
    where
        F: FnMut(proto::SubscribeResponse) -> Result<()>,
    {
        let subscriptions: Vec<proto::Subscription> = paths
            .iter()
            .map(|p| proto::Subscription {
                path: Some(parse_path(p)),
                mode: SubscriptionMode::TargetDefined as i32,
                sample_interval: 0,
                suppress_redundant: false,
                heartbeat_interval: 0,
            })
            .collect();

        let request = proto::SubscribeRequest {
            request: Some(subscribe_request::Request::Subscribe(
                proto::SubscriptionList {
                    prefix: None,
                    subscription: subscriptions,
                    mode: mode as i32,
                    encoding: Encoding::JsonIetf as i32,
                    updates_only: false,
                },
            )),
        };

        let outbound = futures::stream::iter(vec![request]);
        let response = self
            .grpc()?
            .subscribe(tonic::Request::new(outbound))
            .await
            .map_err(|source| GnmiError::Rpc {
                context: "failed to create subscribe stream",
                source,
            })?;

        info!(
            "gNMI Subscribe started: paths={} mode={:?}",
            paths.len(),
            mode
        );

        let mut stream = response.into_inner();
        loop {
            let message = stream.message().await.map_err(|source| GnmiError::Rpc {
                context: "subscribe stream error",
                source,
            })?;
            match message {
                Some(response) => handler(response)?,
                None => return Ok(()),
            }
        }
    }
}
