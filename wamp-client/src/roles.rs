//! The four client roles: Caller, Callee, Publisher, Subscriber.
//!
//! Every request operation allocates a session-local request id, parks a
//! oneshot waiter in the matching pending map, sends the request, and
//! suspends until the dispatcher releases the waiter with the correlated
//! reply or the reply timeout fires.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::oneshot;
use wamp_types::{Args, Dict, Kwargs, Message, WampError};

use crate::{Error, Session, session::Waiters};

/// A callee-side procedure implementation.
///
/// Runs on the dispatcher task; long work is the handler's responsibility to
/// offload. An `Err` is answered with `wamp.error.runtime_error` carrying the
/// message.
pub type InvocationHandler = Arc<dyn Fn(Args, Kwargs) -> Result<Value, String> + Send + Sync>;

/// A subscriber-side event callback. Fire-and-forget.
pub type EventHandler = Arc<dyn Fn(Args, Kwargs) + Send + Sync>;

/// The payload of a RESULT message.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    /// Additional information from the router.
    pub details: Dict,
    /// Positional result payload.
    pub args: Args,
    /// Keyword result payload.
    pub kwargs: Kwargs,
}

/// What a CALL came back with.
///
/// An ERROR reply is a value here, not an [`enum@Error`]: callers routinely
/// need to inspect the error URI (`wamp.error.no_such_registration` and
/// friends) and react to it.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The router delivered a RESULT.
    Result(CallResult),
    /// The router delivered an ERROR.
    Error(WampError),
}

impl CallOutcome {
    /// The first positional result, by convention the procedure's return
    /// value. `None` for errors and empty results.
    pub fn value(&self) -> Option<&Value> {
        match self {
            CallOutcome::Result(result) => result.args.first(),
            CallOutcome::Error(_) => None,
        }
    }

    /// The successful result, or the ERROR converted into [`Error::Router`].
    pub fn into_result(self) -> Result<CallResult, Error> {
        match self {
            CallOutcome::Result(result) => Ok(result),
            CallOutcome::Error(error) => Err(Error::Router(error)),
        }
    }

    /// The ERROR payload, if the call failed.
    pub fn as_error(&self) -> Option<&WampError> {
        match self {
            CallOutcome::Result(_) => None,
            CallOutcome::Error(error) => Some(error),
        }
    }
}

impl Session {
    /// Calls `procedure` and suspends until its RESULT or ERROR arrives.
    pub async fn call(
        &self,
        procedure: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<CallOutcome, Error> {
        let (request_id, waiter) = self.park(&self.state.pending_calls);
        let call = Message::Call {
            request_id,
            options: Dict::new(),
            procedure: procedure.to_owned(),
            args,
            kwargs,
        };
        let reply = self
            .request(&self.state.pending_calls, request_id, waiter, &call)
            .await?;
        match reply {
            Message::Result {
                details,
                args,
                kwargs,
                ..
            } => Ok(CallOutcome::Result(CallResult {
                details,
                args,
                kwargs,
            })),
            Message::Error { .. } => Ok(CallOutcome::Error(into_wamp_error(reply))),
            other => Err(Error::Protocol(format!(
                "unexpected reply to CALL: {}",
                other.name()
            ))),
        }
    }

    /// Registers `procedure` with the router and installs `handler` for the
    /// INVOCATIONs dispatched to it.
    ///
    /// Returns the router-assigned registration id. The id is also recorded
    /// in the session's registration map under `procedure`.
    pub async fn register(
        &self,
        procedure: &str,
        handler: InvocationHandler,
    ) -> Result<u64, Error> {
        let (request_id, waiter) = self.park(&self.state.pending_registrations);
        let register = Message::Register {
            request_id,
            options: Dict::new(),
            procedure: procedure.to_owned(),
        };
        let reply = self
            .request(
                &self.state.pending_registrations,
                request_id,
                waiter,
                &register,
            )
            .await?;
        match reply {
            Message::Registered {
                registration_id, ..
            } => {
                self.state
                    .invocation_handlers
                    .lock()
                    .insert(registration_id, handler);
                self.state
                    .registration_map
                    .lock()
                    .insert(procedure.to_owned(), registration_id);
                tracing::debug!("registered {procedure} as {registration_id}");
                Ok(registration_id)
            }
            Message::Error { .. } => Err(Error::Router(into_wamp_error(reply))),
            other => Err(Error::Protocol(format!(
                "unexpected reply to REGISTER: {}",
                other.name()
            ))),
        }
    }

    /// Removes the registration recorded for `procedure`.
    pub async fn unregister(&self, procedure: &str) -> Result<(), Error> {
        let registration_id = self
            .state
            .registration_map
            .lock()
            .get(procedure)
            .copied()
            .ok_or_else(|| Error::Protocol(format!("{procedure} is not registered")))?;

        let (request_id, waiter) = self.park(&self.state.pending_unregistrations);
        let unregister = Message::Unregister {
            request_id,
            registration_id,
        };
        let reply = self
            .request(
                &self.state.pending_unregistrations,
                request_id,
                waiter,
                &unregister,
            )
            .await?;
        match reply {
            Message::Unregistered { .. } => {
                self.state.registration_map.lock().remove(procedure);
                self.state
                    .invocation_handlers
                    .lock()
                    .remove(&registration_id);
                Ok(())
            }
            Message::Error { .. } => Err(Error::Router(into_wamp_error(reply))),
            other => Err(Error::Protocol(format!(
                "unexpected reply to UNREGISTER: {}",
                other.name()
            ))),
        }
    }

    /// Subscribes to `topic`, delivering every EVENT to `handler` in arrival
    /// order.
    ///
    /// Returns the router-assigned subscription id, also recorded in the
    /// session's subscription map under `topic`.
    pub async fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<u64, Error> {
        let (request_id, waiter) = self.park(&self.state.pending_subscriptions);
        let subscribe = Message::Subscribe {
            request_id,
            options: Dict::new(),
            topic: topic.to_owned(),
        };
        let reply = self
            .request(
                &self.state.pending_subscriptions,
                request_id,
                waiter,
                &subscribe,
            )
            .await?;
        match reply {
            Message::Subscribed {
                subscription_id, ..
            } => {
                self.state
                    .event_handlers
                    .lock()
                    .insert(subscription_id, handler);
                self.state
                    .subscription_map
                    .lock()
                    .insert(topic.to_owned(), subscription_id);
                tracing::debug!("subscribed to {topic} as {subscription_id}");
                Ok(subscription_id)
            }
            Message::Error { .. } => Err(Error::Router(into_wamp_error(reply))),
            other => Err(Error::Protocol(format!(
                "unexpected reply to SUBSCRIBE: {}",
                other.name()
            ))),
        }
    }

    /// Removes the subscription recorded for `topic`.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        let subscription_id = self
            .state
            .subscription_map
            .lock()
            .get(topic)
            .copied()
            .ok_or_else(|| Error::Protocol(format!("{topic} is not subscribed")))?;

        let (request_id, waiter) = self.park(&self.state.pending_unsubscriptions);
        let unsubscribe = Message::Unsubscribe {
            request_id,
            subscription_id,
        };
        let reply = self
            .request(
                &self.state.pending_unsubscriptions,
                request_id,
                waiter,
                &unsubscribe,
            )
            .await?;
        match reply {
            Message::Unsubscribed { .. } => {
                self.state.subscription_map.lock().remove(topic);
                self.state.event_handlers.lock().remove(&subscription_id);
                Ok(())
            }
            Message::Error { .. } => Err(Error::Router(into_wamp_error(reply))),
            other => Err(Error::Protocol(format!(
                "unexpected reply to UNSUBSCRIBE: {}",
                other.name()
            ))),
        }
    }

    /// Publishes an event to `topic` without waiting for acknowledgement.
    pub async fn publish(&self, topic: &str, args: Args, kwargs: Kwargs) -> Result<(), Error> {
        let request_id = self.state.next_request_id();
        let mut options = Dict::new();
        options.insert("acknowledge".to_owned(), json!(false));
        let publish = Message::Publish {
            request_id,
            options,
            topic: topic.to_owned(),
            args,
            kwargs,
        };
        self.send(&publish).await
    }

    /// Publishes an event to `topic` and suspends until the router
    /// acknowledges it. Returns the publication id.
    pub async fn publish_acknowledged(
        &self,
        topic: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<u64, Error> {
        let (request_id, waiter) = self.park(&self.state.pending_publications);
        let mut options = Dict::new();
        options.insert("acknowledge".to_owned(), json!(true));
        let publish = Message::Publish {
            request_id,
            options,
            topic: topic.to_owned(),
            args,
            kwargs,
        };
        let reply = self
            .request(
                &self.state.pending_publications,
                request_id,
                waiter,
                &publish,
            )
            .await?;
        match reply {
            Message::Published { publication_id, .. } => Ok(publication_id),
            Message::Error { .. } => Err(Error::Router(into_wamp_error(reply))),
            other => Err(Error::Protocol(format!(
                "unexpected reply to PUBLISH: {}",
                other.name()
            ))),
        }
    }

    /// Allocates a request id and parks a waiter for it in `table`.
    fn park(&self, table: &Waiters) -> (u64, oneshot::Receiver<Message>) {
        let request_id = self.state.next_request_id();
        let (sender, receiver) = oneshot::channel();
        table.lock().insert(request_id, sender);
        (request_id, receiver)
    }

    /// Sends `message` and suspends on `waiter` until the dispatcher delivers
    /// the correlated reply.
    ///
    /// A timeout releases only this waiter and leaves the session alive; a
    /// dropped sender means the session ended underneath us.
    async fn request(
        &self,
        table: &Waiters,
        request_id: u64,
        waiter: oneshot::Receiver<Message>,
        message: &Message,
    ) -> Result<Message, Error> {
        if let Err(err) = self.send(message).await {
            table.lock().remove(&request_id);
            return Err(err);
        }
        match tokio::time::timeout(self.config.reply_timeout, waiter).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                table.lock().remove(&request_id);
                Err(Error::Protocol(format!(
                    "no reply to {} request {request_id}",
                    message.name()
                )))
            }
        }
    }
}

fn into_wamp_error(message: Message) -> WampError {
    match message {
        Message::Error {
            request_type,
            request_id,
            details,
            error,
            args,
            kwargs,
        } => WampError {
            request_type,
            request_id,
            details,
            error,
            args,
            kwargs,
        },
        _ => unreachable!("caller matched Message::Error"),
    }
}
