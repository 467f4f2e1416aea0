//! Peer configuration.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use wamp_types::{Dict, roles::RoleSet};

/// Computes the signature for an authentication challenge.
///
/// Receives the `authmethod` and the method-specific `extra` dictionary from
/// the router's CHALLENGE and returns the signature placed in AUTHENTICATE.
pub type ChallengeHandler = Arc<dyn Fn(&str, &Dict) -> String + Send + Sync>;

/// How to reach the router and which realm to join.
///
/// ```no_run
/// use wamp_client::PeerConfig;
///
/// let config = PeerConfig::new("router.example.com", 8080, "realm1")
///     .with_tls(Some("/etc/ssl/router-ca.pem".into()));
/// ```
#[derive(Clone)]
pub struct PeerConfig {
    /// Router host name or address.
    pub host: String,
    /// Router port.
    pub port: u16,
    /// The realm to join.
    pub realm: String,
    /// Path component of the WebSocket endpoint, without the leading slash.
    pub websocket_location: String,
    /// Wrap the TCP connection in TLS.
    pub use_tls: bool,
    /// PEM bundle of trusted CAs. When unset, the webpki root store is used.
    pub ca_certificate_path: Option<PathBuf>,
    /// The roles advertised in HELLO.
    pub roles: RoleSet,
    /// Invoked when the router answers HELLO with a CHALLENGE. Establishment
    /// against an authenticating router fails without one.
    pub on_challenge: Option<ChallengeHandler>,
    /// How long request operations wait for their correlated reply.
    pub reply_timeout: Duration,
}

impl PeerConfig {
    /// A plaintext-transport config with all roles enabled and a 5 second
    /// reply timeout.
    pub fn new(host: impl Into<String>, port: u16, realm: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            realm: realm.into(),
            websocket_location: "ws".to_owned(),
            use_tls: false,
            ca_certificate_path: None,
            roles: RoleSet::default(),
            on_challenge: None,
            reply_timeout: Duration::from_secs(5),
        }
    }

    /// Enables TLS, optionally trusting only the given PEM CA bundle.
    pub fn with_tls(mut self, ca_certificate_path: Option<PathBuf>) -> Self {
        self.use_tls = true;
        self.ca_certificate_path = ca_certificate_path;
        self
    }

    /// Overrides the path component of the WebSocket endpoint.
    pub fn with_websocket_location(mut self, location: impl Into<String>) -> Self {
        self.websocket_location = location.into().trim_start_matches('/').to_owned();
        self
    }

    /// Overrides the advertised roles.
    pub fn with_roles(mut self, roles: RoleSet) -> Self {
        self.roles = roles;
        self
    }

    /// Installs the authentication challenge handler.
    pub fn with_on_challenge(mut self, handler: ChallengeHandler) -> Self {
        self.on_challenge = Some(handler);
        self
    }

    /// Overrides the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

impl fmt::Debug for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("realm", &self.realm)
            .field("websocket_location", &self.websocket_location)
            .field("use_tls", &self.use_tls)
            .field("ca_certificate_path", &self.ca_certificate_path)
            .field("roles", &self.roles)
            .field("on_challenge", &self.on_challenge.is_some())
            .field("reply_timeout", &self.reply_timeout)
            .finish()
    }
}
