use std::sync::Arc;

use rustls::{
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig,
    RootCertStore,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::{
    error::{ErrorKind, Result},
    options::TlsOptions,
};

pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// A rustls connector built once from [`TlsOptions`] and shared by every connection the
/// establisher opens.
#[derive(Clone)]
pub(crate) struct TlsConfig {
    connector: TlsConnector,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish()
    }
}

impl TlsConfig {
    pub(crate) fn new(options: &TlsOptions) -> Result<TlsConfig> {
        let mut config = make_rustls_config(options)?;
        config.enable_sni = true;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    pub(crate) async fn connect(&self, host: &str, tcp_stream: TcpStream) -> Result<TlsStream> {
        let name = ServerName::try_from(host.to_string()).map_err(|e| {
            ErrorKind::InvalidTlsConfig {
                message: format!("invalid server name {:?}: {}", host, e),
            }
        })?;

        let conn = self.connector.connect(name, tcp_stream).await?;
        Ok(conn)
    }
}

fn invalid_pem(what: &str, path: &std::path::Path, error: impl std::fmt::Display) -> ErrorKind {
    ErrorKind::InvalidTlsConfig {
        message: format!(
            "Unable to parse PEM-encoded {} from {}: {}",
            what,
            path.display(),
            error
        ),
    }
}

/// Trusts `ca_file_path` if given and the bundled web PKI roots otherwise. A `cert_key_file_path`
/// PEM holds both the client certificate chain and its key.
fn make_rustls_config(cfg: &TlsOptions) -> Result<ClientConfig> {
    let mut store = RootCertStore::empty();
    if let Some(ref path) = cfg.ca_file_path {
        let ders = CertificateDer::pem_file_iter(path)
            .map_err(|e| invalid_pem("root certificate", path, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid_pem("root certificate", path, e))?;
        store.add_parsable_certificates(ders);
    } else {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| ErrorKind::InvalidTlsConfig {
                message: e.to_string(),
            })?
            .with_root_certificates(store);

    let config = if let Some(ref path) = cfg.cert_key_file_path {
        let certs = CertificateDer::pem_file_iter(path)
            .map_err(|e| invalid_pem("client certificate", path, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid_pem("client certificate", path, e))?;
        let key = PrivateKeyDer::from_pem_file(path)
            .map_err(|e| invalid_pem("private key", path, e))?;

        builder
            .with_client_auth_cert(certs, key)
            .map_err(|error| ErrorKind::InvalidTlsConfig {
                message: error.to_string(),
            })?
    } else {
        builder.with_no_client_auth()
    };

    Ok(config)
}
