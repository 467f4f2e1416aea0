//! The inbound dispatcher: one background task per session reading the
//! socket, decoding messages, and fanning them out.
//!
//! Lifecycle messages go to the general queue the session is waiting on;
//! replies release the waiter registered under their request id; EVENTs and
//! INVOCATIONs run the registered handler. Handler failures are logged and,
//! where the protocol requires it, answered with an ERROR message; they never
//! stop the reader. Socket loss does: the session moves to its failed state
//! and every pending waiter is released.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wamp_types::{Args, Dict, Kwargs, Message, codes, uris};

use crate::{
    session::SessionState,
    ws::{SocketReader, WsMessage},
};

pub(crate) async fn run(
    mut reader: SocketReader,
    state: Arc<SessionState>,
    cancel: CancellationToken,
) {
    loop {
        let inbound = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("dispatcher cancelled");
                break;
            }
            inbound = reader.read_message() => inbound,
        };

        match inbound {
            Err(err) => {
                tracing::debug!("reader stopped: {err}");
                state.connection_lost();
                break;
            }
            Ok(WsMessage::Close) => {
                tracing::debug!("router closed the connection");
                state.connection_lost();
                break;
            }
            Ok(WsMessage::Ping(payload)) => {
                let mut writer = state.writer.lock().await;
                if let Some(writer) = writer.as_mut()
                    && let Err(err) = writer.send_pong(&payload).await
                {
                    tracing::warn!("failed to answer ping: {err}");
                }
            }
            Ok(WsMessage::Text(payload)) => dispatch(&state, &payload).await,
            // some routers put JSON into binary frames; accept it when it is
            // valid UTF-8
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(payload) => dispatch(&state, &payload).await,
                Err(_) => tracing::warn!("dropping non-UTF-8 binary message"),
            },
        }
    }
}

async fn dispatch(state: &SessionState, payload: &str) {
    let message = match Message::from_wire(payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!("dropping undecodable message: {err}");
            return;
        }
    };
    tracing::debug!("received {} message", message.name());

    match message {
        Message::Welcome { .. }
        | Message::Challenge { .. }
        | Message::Goodbye { .. }
        | Message::Abort { .. } => state.push_lifecycle(message).await,

        Message::Result { request_id, .. } => {
            state.complete(&state.pending_calls, request_id, message);
        }
        Message::Registered { request_id, .. } => {
            state.complete(&state.pending_registrations, request_id, message);
        }
        Message::Unregistered { request_id } => {
            state.complete(&state.pending_unregistrations, request_id, message);
        }
        Message::Subscribed { request_id, .. } => {
            state.complete(&state.pending_subscriptions, request_id, message);
        }
        Message::Unsubscribed { request_id } => {
            state.complete(&state.pending_unsubscriptions, request_id, message);
        }
        Message::Published { request_id, .. } => {
            state.complete(&state.pending_publications, request_id, message);
        }

        Message::Error {
            request_type,
            request_id,
            ..
        } => {
            let table = match request_type {
                codes::CALL => &state.pending_calls,
                codes::REGISTER => &state.pending_registrations,
                codes::UNREGISTER => &state.pending_unregistrations,
                codes::SUBSCRIBE => &state.pending_subscriptions,
                codes::UNSUBSCRIBE => &state.pending_unsubscriptions,
                codes::PUBLISH => &state.pending_publications,
                other => {
                    tracing::warn!("dropping ERROR echoing unknown request type {other}");
                    return;
                }
            };
            state.complete(table, request_id, message);
        }

        Message::Event {
            subscription_id,
            args,
            kwargs,
            ..
        } => {
            let handler = state.event_handlers.lock().get(&subscription_id).cloned();
            match handler {
                Some(handler) => handler(args, kwargs),
                None => {
                    tracing::warn!("dropping EVENT for unknown subscription {subscription_id}")
                }
            }
        }

        Message::Invocation {
            request_id,
            registration_id,
            args,
            kwargs,
            ..
        } => invoke(state, request_id, registration_id, args, kwargs).await,

        other => tracing::warn!("dropping unexpected {} from router", other.name()),
    }
}

/// Runs the registered invocation handler and answers with YIELD, or with an
/// ERROR when the handler fails. Handlers run on the dispatcher task; long
/// work is the handler's responsibility to offload.
async fn invoke(
    state: &SessionState,
    invocation_id: u64,
    registration_id: u64,
    args: Args,
    kwargs: Kwargs,
) {
    let handler = state
        .invocation_handlers
        .lock()
        .get(&registration_id)
        .cloned();
    let Some(handler) = handler else {
        tracing::warn!("dropping INVOCATION for unknown registration {registration_id}");
        return;
    };

    let reply = match handler(args, kwargs) {
        Ok(value) => Message::Yield {
            request_id: invocation_id,
            options: Dict::new(),
            args: vec![value],
            kwargs: Kwargs::new(),
        },
        Err(reason) => {
            tracing::warn!("invocation handler for {registration_id} failed: {reason}");
            Message::Error {
                request_type: codes::INVOCATION,
                request_id: invocation_id,
                details: Dict::new(),
                error: uris::ERROR_RUNTIME_ERROR.to_owned(),
                args: vec![reason.into()],
                kwargs: Kwargs::new(),
            }
        }
    };
    if let Err(err) = state.send(&reply).await {
        tracing::warn!("failed to answer invocation {invocation_id}: {err}");
    }
}
