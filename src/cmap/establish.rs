use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use derive_where::derive_where;
use futures_core::future::BoxFuture;
use tokio::net::TcpStream;

#[cfg(feature = "rustls-tls")]
use super::tls::TlsConfig;
use super::{
    conn::{Connection, StreamDescription},
    transport::{Connector, Transport},
    wire::StreamTransport,
};
use crate::{
    auth::{Authenticator, Credential},
    error::{ErrorKind, Result},
    hello::{hello_command, run_hello, HelloReply},
    options::{ClientOptions, ServerAddress},
    runtime,
    trace::CONNECTION_TRACING_EVENT_TARGET,
};

/// Opens plain TCP or TLS streams framed with OP_MSG.
#[derive(Clone, Debug)]
pub(crate) struct TcpConnector {
    #[cfg(feature = "rustls-tls")]
    tls_config: Option<TlsConfig>,
}

impl TcpConnector {
    pub(crate) fn new(options: &ClientOptions) -> Result<Self> {
        #[cfg(feature = "rustls-tls")]
        {
            let tls_config = options.tls.as_ref().map(TlsConfig::new).transpose()?;
            Ok(Self { tls_config })
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            if options.tls.is_some() {
                return Err(ErrorKind::InvalidTlsConfig {
                    message: "TLS was requested but the `rustls-tls` feature is disabled"
                        .to_string(),
                }
                .into());
            }
            Ok(Self {})
        }
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            let stream = TcpStream::connect((address.host(), address.port())).await?;
            stream.set_nodelay(true)?;

            #[cfg(feature = "rustls-tls")]
            if let Some(ref tls_config) = self.tls_config {
                let tls_stream = tls_config.connect(address.host(), stream).await?;
                return Ok(Box::new(StreamTransport::new(tls_stream)) as Box<dyn Transport>);
            }

            Ok(Box::new(StreamTransport::new(stream)) as Box<dyn Transport>)
        })
    }
}

/// Contains the logic to establish a connection: opening the transport, handshaking and
/// authenticating.
#[derive(Clone)]
#[derive_where(Debug)]
pub(crate) struct ConnectionEstablisher {
    #[derive_where(skip)]
    connector: Arc<dyn Connector>,

    app_name: Option<String>,

    /// Shared with the topology so that `auth` and `logout` apply to every later connection.
    credential: Arc<RwLock<Option<Credential>>>,

    #[derive_where(skip)]
    authenticator: Option<Arc<dyn Authenticator>>,

    connect_timeout: Duration,

    socket_timeout: Option<Duration>,
}

impl ConnectionEstablisher {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        options: &ClientOptions,
        credential: Arc<RwLock<Option<Credential>>>,
    ) -> Self {
        let connect_timeout = match options.connect_timeout() {
            d if d.is_zero() => Duration::MAX,
            d => d,
        };

        Self {
            connector,
            app_name: options.app_name.clone(),
            credential,
            authenticator: options.authenticator.clone(),
            connect_timeout,
            socket_timeout: options.socket_timeout,
        }
    }

    pub(crate) fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    fn current_credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .ok()
            .and_then(|credential| credential.clone())
    }

    async fn open(&self, address: &ServerAddress, id: u32, generation: u32) -> Result<(Connection, HelloReply)> {
        let transport = self.connector.connect(address).await?;
        let mut connection =
            Connection::new(id, address.clone(), generation, transport, self.socket_timeout);

        let hello_reply =
            run_hello(&mut connection, hello_command(self.app_name.as_deref(), true)).await?;
        connection.stream_description = Some(StreamDescription::from_hello_reply(&hello_reply));

        Ok((connection, hello_reply))
    }

    /// Establishes a pooled connection. The whole exchange, authentication included, is bounded
    /// by the connect timeout.
    pub(crate) async fn establish_connection(
        &self,
        address: &ServerAddress,
        id: u32,
        generation: u32,
    ) -> Result<Connection> {
        let result = runtime::timeout(self.connect_timeout, async {
            let (mut connection, _) = self.open(address, id, generation).await?;

            if let (Some(authenticator), Some(credential)) =
                (self.authenticator.as_ref(), self.current_credential())
            {
                authenticator
                    .authenticate(&mut connection, &credential)
                    .await
                    .map_err(|e| match *e.kind {
                        ErrorKind::Authentication { .. } => e,
                        _ => ErrorKind::Authentication {
                            message: e.to_string(),
                        }
                        .into(),
                    })?;
            }

            Ok(connection)
        })
        .await
        .and_then(|r| r);

        if let Err(ref error) = result {
            tracing::debug!(
                target: CONNECTION_TRACING_EVENT_TARGET,
                serverHost = address.host(),
                serverPort = address.port(),
                driverConnectionId = id,
                error = %error,
                "Connection establishment failed"
            );
        }

        result
    }

    /// Establishes a monitoring connection. Monitoring connections are never authenticated.
    pub(crate) async fn establish_monitoring_connection(
        &self,
        address: &ServerAddress,
    ) -> Result<(Connection, HelloReply)> {
        runtime::timeout(self.connect_timeout, self.open(address, 0, 0))
            .await
            .and_then(|r| r)
    }

    /// Re-runs the handshake on an established monitoring connection.
    pub(crate) async fn heartbeat(&self, connection: &mut Connection) -> Result<HelloReply> {
        runtime::timeout(
            self.connect_timeout,
            run_hello(connection, hello_command(None, false)),
        )
        .await
        .and_then(|r| r)
    }
}
