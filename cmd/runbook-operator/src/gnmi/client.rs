use std::time::Duration;

use log::info;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

use super::proto::g_nmi_client::GNmiClient;
use super::{GnmiError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS material for a device connection.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub ca_file: String,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub server_name: Option<String>,
}

/// Manages a gNMI connection to one network device.
pub struct Client {
    address: String,
    tls: Option<TlsOptions>,
    timeout: Duration,
    inner: Option<GNmiClient<Channel>>,
}

impl Client {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            tls: None,
            timeout: DEFAULT_TIMEOUT,
            inner: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub(super) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dials the device. TLS is mandatory; a client without TLS material
    /// fails here rather than attempting a cleartext connection.
    pub async fn connect(&mut self) -> Result<()> {
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| GnmiError::TlsRequired(self.address.clone()))?;

        let ca = tokio::fs::read(&tls.ca_file).await?;
        let mut tls_config = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));

        if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
            let cert = tokio::fs::read(cert_file).await?;
            let key = tokio::fs::read(key_file).await?;
            tls_config = tls_config.identity(Identity::from_pem(cert, key));
        }
        if let Some(server_name) = &tls.server_name {
            tls_config = tls_config.domain_name(server_name.clone());
        }

        let endpoint = Endpoint::from_shared(format!("https://{}", self.address))
            .map_err(|_| GnmiError::Address(self.address.clone()))?
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .tls_config(tls_config)
            .map_err(|source| GnmiError::Connect {
                address: self.address.clone(),
                source,
            })?;

        let channel = endpoint
            .connect()
            .await
            .map_err(|source| GnmiError::Connect {
                address: self.address.clone(),
                source,
            })?;

        self.inner = Some(GNmiClient::new(channel));
        info!("connected to device {}", self.address);
        Ok(())
    }

    pub(super) fn grpc(&mut self) -> Result<&mut GNmiClient<Channel>> {
        self.inner.as_mut().ok_or(GnmiError::NotConnected)
    }
}
