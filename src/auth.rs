//! Contains the credential type and the authentication capability used when establishing
//! connections.

use derive_where::derive_where;
use futures_core::future::BoxFuture;
use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{bson::Document, cmap::Connection, error::Result};

/// Who to authenticate as. The crate only stores and hands out the credential; how it is
/// presented to the server is up to the configured [`Authenticator`].
#[derive(Clone, Default, Deserialize, TypedBuilder, PartialEq)]
#[derive_where(Debug)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct Credential {
    #[allow(missing_docs)]
    pub username: Option<String>,

    /// The database used to authenticate. Defaults to the database named in the connection
    /// string, then to "admin".
    pub source: Option<String>,

    /// Never printed by `Debug`.
    #[derive_where(skip)]
    pub password: Option<String>,

    /// Which authentication mechanism to use, passed through to the [`Authenticator`] untouched.
    pub mechanism: Option<String>,

    /// Mechanism specific settings, also passed through untouched.
    pub mechanism_properties: Option<Document>,
}

impl Credential {
    /// The database the credential is defined in, `admin` unless `authSource` says otherwise.
    pub fn resolved_source(&self) -> &str {
        self.source.as_deref().unwrap_or("admin")
    }
}

/// Performs the authentication conversation for a freshly established connection.
///
/// The topology invokes the authenticator once per new connection, after the handshake and before
/// the connection is checked in to a pool. Mechanism negotiation and the wire conversation are
/// entirely up to the implementor; a returned error fails the connection.
pub trait Authenticator: Send + Sync {
    /// Authenticates `conn` using `credential`.
    fn authenticate<'a>(
        &'a self,
        conn: &'a mut Connection,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<()>>;

    /// Called when the topology's credentials are discarded. Connections opened afterwards are
    /// not authenticated.
    fn logout<'a>(&'a self, _credential: &'a Credential) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
