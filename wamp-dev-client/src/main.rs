use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use clap::Parser as _;
use secrecy::ExposeSecret as _;
use serde_json::Value;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};
use wamp_client::{Client, Kwargs, PeerConfig};

use crate::config::{Command, DevClientConfig};

mod config;

fn install_tracing(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn peer_config(config: &DevClientConfig) -> PeerConfig {
    let mut peer = PeerConfig::new(config.host.clone(), config.port, config.realm.clone())
        .with_reply_timeout(config.reply_timeout);
    if config.tls {
        peer = peer.with_tls(config.ca_certificate.clone());
    }
    if let Some(ticket) = &config.ticket {
        let ticket = ticket.expose_secret().to_owned();
        peer = peer.with_on_challenge(Arc::new(move |authmethod, _extra| {
            tracing::debug!("answering {authmethod} challenge with the configured ticket");
            ticket.clone()
        }));
    }
    peer
}

// bare words become strings, everything else is parsed as JSON
fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

async fn run_call(client: &Client, cmd: config::CallCommand) -> eyre::Result<()> {
    let outcome = client
        .call(&cmd.procedure, parse_args(&cmd.args), Kwargs::new())
        .await?;
    match outcome {
        wamp_client::CallOutcome::Result(result) => {
            tracing::info!("call succeeded");
            println!("{}", serde_json::to_string_pretty(&result.args)?);
        }
        wamp_client::CallOutcome::Error(error) => {
            tracing::warn!("call failed: {error}");
            println!("{}", error.error);
        }
    }
    Ok(())
}

async fn run_publish(client: &Client, cmd: config::PublishCommand) -> eyre::Result<()> {
    let args = parse_args(&cmd.args);
    if cmd.acknowledge {
        let publication_id = client
            .publish_acknowledged(&cmd.topic, args, Kwargs::new())
            .await?;
        tracing::info!("published as publication {publication_id}");
    } else {
        client.publish(&cmd.topic, args, Kwargs::new()).await?;
        tracing::info!("published without acknowledgement");
    }
    Ok(())
}

async fn run_subscribe(client: &Client, cmd: config::SubscribeCommand) -> eyre::Result<()> {
    let received = Arc::new(AtomicUsize::new(0));
    let subscription_id = client
        .subscribe(&cmd.topic, {
            let topic = cmd.topic.clone();
            let received = Arc::clone(&received);
            Arc::new(move |args, kwargs| {
                received.fetch_add(1, Ordering::Relaxed);
                tracing::info!("event on {topic}: args={args:?} kwargs={kwargs:?}");
            })
        })
        .await?;
    tracing::info!(
        "subscribed to {} as subscription {subscription_id}; listening for {}",
        cmd.topic,
        humantime::format_duration(cmd.listen_time)
    );

    tokio::select! {
        _ = tokio::time::sleep(cmd.listen_time) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }
    tracing::info!(
        "received {} events on {}",
        received.load(Ordering::Relaxed),
        cmd.topic
    );
    Ok(())
}

async fn run_register_echo(client: &Client, cmd: config::RegisterEchoCommand) -> eyre::Result<()> {
    let registration_id = client
        .register(
            &cmd.procedure,
            Arc::new(|args, _kwargs| Ok(args.first().cloned().unwrap_or(Value::Null))),
        )
        .await?;
    tracing::info!(
        "registered {} as registration {registration_id}; serving for {}",
        cmd.procedure,
        humantime::format_duration(cmd.serve_time)
    );

    tokio::select! {
        _ = tokio::time::sleep(cmd.serve_time) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }
    Ok(())
}

async fn run_registrations(client: &Client, cmd: config::RegistrationsCommand) -> eyre::Result<()> {
    let list = client.get_registration_list().await?;
    println!("{}", serde_json::to_string_pretty(&list)?);

    if let Some(procedure) = cmd.procedure {
        match client.get_registration_lookup(&procedure).await? {
            None => println!("{procedure}: no registration"),
            Some(registration_id) => {
                let callees = client.count_callees(registration_id).await?;
                println!("{procedure}: registration {registration_id} with {callees} callee(s)");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_tracing("wamp_dev_client=debug,wamp_client=debug,warn");
    let config = DevClientConfig::parse();
    tracing::info!("starting wamp-dev-client with config: {config:#?}");

    let client = Client::connect(peer_config(&config)).await?;
    tracing::info!(
        "joined realm {} as session {:?}",
        config.realm,
        client.session_id()
    );

    let result = match config.command.clone() {
        Command::Call(cmd) => run_call(&client, cmd).await,
        Command::Publish(cmd) => run_publish(&client, cmd).await,
        Command::Subscribe(cmd) => run_subscribe(&client, cmd).await,
        Command::RegisterEcho(cmd) => run_register_echo(&client, cmd).await,
        Command::Registrations(cmd) => run_registrations(&client, cmd).await,
    };

    client.close().await;
    result
}
