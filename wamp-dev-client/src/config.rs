use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use secrecy::SecretString;

#[derive(Clone, Parser, Debug)]
pub struct CallCommand {
    /// The procedure URI to call
    #[clap(long, env = "WAMP_DEV_CLIENT_PROCEDURE")]
    pub procedure: String,

    /// Positional arguments; JSON values, bare words are taken as strings
    #[clap(long, value_delimiter = ',')]
    pub args: Vec<String>,
}

#[derive(Clone, Parser, Debug)]
pub struct PublishCommand {
    /// The topic URI to publish to
    #[clap(long, env = "WAMP_DEV_CLIENT_TOPIC")]
    pub topic: String,

    /// Positional arguments; JSON values, bare words are taken as strings
    #[clap(long, value_delimiter = ',')]
    pub args: Vec<String>,

    /// Wait for the router's acknowledgement
    #[clap(long, env = "WAMP_DEV_CLIENT_ACKNOWLEDGE")]
    pub acknowledge: bool,
}

#[derive(Clone, Parser, Debug)]
pub struct SubscribeCommand {
    /// The topic URI to subscribe to
    #[clap(long, env = "WAMP_DEV_CLIENT_TOPIC")]
    pub topic: String,

    /// How long to listen before leaving the realm
    #[clap(long, env = "WAMP_DEV_CLIENT_LISTEN_TIME", default_value="1min", value_parser=humantime::parse_duration)]
    pub listen_time: Duration,
}

#[derive(Clone, Parser, Debug)]
pub struct RegisterEchoCommand {
    /// The procedure URI to register
    #[clap(long, env = "WAMP_DEV_CLIENT_PROCEDURE", default_value = "echo")]
    pub procedure: String,

    /// How long to serve invocations before leaving the realm
    #[clap(long, env = "WAMP_DEV_CLIENT_SERVE_TIME", default_value="1min", value_parser=humantime::parse_duration)]
    pub serve_time: Duration,
}

#[derive(Clone, Parser, Debug)]
pub struct RegistrationsCommand {
    /// Also look up this procedure name
    #[clap(long)]
    pub procedure: Option<String>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    Call(CallCommand),
    Publish(PublishCommand),
    Subscribe(SubscribeCommand),
    RegisterEcho(RegisterEchoCommand),
    Registrations(RegistrationsCommand),
}

/// The configuration for the WAMP dev client.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug)]
pub struct DevClientConfig {
    /// The router host
    #[clap(long, env = "WAMP_DEV_CLIENT_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// The router port
    #[clap(long, env = "WAMP_DEV_CLIENT_PORT", default_value = "8080")]
    pub port: u16,

    /// The realm to join
    #[clap(long, env = "WAMP_DEV_CLIENT_REALM", default_value = "realm1")]
    pub realm: String,

    /// Wrap the connection in TLS
    #[clap(long, env = "WAMP_DEV_CLIENT_TLS")]
    pub tls: bool,

    /// PEM bundle of trusted CAs; defaults to the webpki roots
    #[clap(long, env = "WAMP_DEV_CLIENT_CA_CERTIFICATE")]
    pub ca_certificate: Option<PathBuf>,

    /// Static ticket presented when the router challenges us
    #[clap(long, env = "WAMP_DEV_CLIENT_TICKET")]
    pub ticket: Option<SecretString>,

    /// How long request operations wait for their reply
    #[clap(long, env = "WAMP_DEV_CLIENT_REPLY_TIMEOUT", default_value="5s", value_parser=humantime::parse_duration)]
    pub reply_timeout: Duration,

    /// Command
    #[command(subcommand)]
    pub command: Command,
}
