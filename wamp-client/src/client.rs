//! The client façade: scoped session acquisition plus the role operations
//! and the `wamp.registration.*` meta API.

use serde_json::Value;
use wamp_types::{Args, Dict, Kwargs, uris};

use crate::{
    CallOutcome, Error, PeerConfig, Session,
    roles::{EventHandler, InvocationHandler},
};

/// A connected WAMP peer.
///
/// [`Client::connect`] begins the session; [`Client::close`] says goodbye and
/// tears it down. Dropping an unclosed client still stops the dispatcher and
/// releases the socket, so every exit path cleans up; only the GOODBYE
/// courtesy is skipped.
pub struct Client {
    session: Session,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connects to the router and joins the configured realm.
    pub async fn connect(config: PeerConfig) -> Result<Self, Error> {
        let mut session = Session::new(config);
        session.begin().await?;
        Ok(Self { session })
    }

    /// Ends the session gracefully and releases the transport.
    pub async fn close(mut self) {
        self.session.end().await;
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The router-assigned session id.
    pub fn session_id(&self) -> Option<u64> {
        self.session.id()
    }

    /// Calls `procedure`. See [`Session::call`].
    pub async fn call(
        &self,
        procedure: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<CallOutcome, Error> {
        self.session.call(procedure, args, kwargs).await
    }

    /// Registers `procedure` with `handler`. See [`Session::register`].
    pub async fn register(
        &self,
        procedure: &str,
        handler: InvocationHandler,
    ) -> Result<u64, Error> {
        self.session.register(procedure, handler).await
    }

    /// Removes the registration for `procedure`. See [`Session::unregister`].
    pub async fn unregister(&self, procedure: &str) -> Result<(), Error> {
        self.session.unregister(procedure).await
    }

    /// Subscribes `handler` to `topic`. See [`Session::subscribe`].
    pub async fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<u64, Error> {
        self.session.subscribe(topic, handler).await
    }

    /// Removes the subscription for `topic`. See [`Session::unsubscribe`].
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        self.session.unsubscribe(topic).await
    }

    /// Publishes to `topic` without acknowledgement. See [`Session::publish`].
    pub async fn publish(&self, topic: &str, args: Args, kwargs: Kwargs) -> Result<(), Error> {
        self.session.publish(topic, args, kwargs).await
    }

    /// Publishes to `topic` and waits for the router's acknowledgement. See
    /// [`Session::publish_acknowledged`].
    pub async fn publish_acknowledged(
        &self,
        topic: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<u64, Error> {
        self.session.publish_acknowledged(topic, args, kwargs).await
    }

    /// Lists the dealer's registrations, keyed by match policy:
    /// `{exact: [id], prefix: [id], wildcard: [id]}`.
    pub async fn get_registration_list(&self) -> Result<Dict, Error> {
        let value = self
            .meta_call(uris::registration::LIST, Args::new())
            .await?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(Error::Protocol(format!(
                "wamp.registration.list returned {other} instead of a map"
            ))),
        }
    }

    /// Looks up the registration id exactly matching `procedure_name`, if
    /// any.
    pub async fn get_registration_lookup(
        &self,
        procedure_name: &str,
    ) -> Result<Option<u64>, Error> {
        let value = self
            .meta_call(uris::registration::LOOKUP, vec![procedure_name.into()])
            .await?;
        optional_id(uris::registration::LOOKUP, value)
    }

    /// Looks up the registration id the dealer would route a call to
    /// `procedure_name` to, if any.
    pub async fn get_registration_match(
        &self,
        procedure_name: &str,
    ) -> Result<Option<u64>, Error> {
        let value = self
            .meta_call(uris::registration::MATCH, vec![procedure_name.into()])
            .await?;
        optional_id(uris::registration::MATCH, value)
    }

    /// Fetches the detail record `{id, created, uri, match, invoke}` for a
    /// registration.
    ///
    /// The outcome is returned whole: an unknown id answers with an ERROR
    /// carrying `wamp.error.no_such_registration`, and callers want to see
    /// that URI rather than a flattened failure.
    pub async fn get_registration(
        &self,
        registration_id: impl Into<Value>,
    ) -> Result<CallOutcome, Error> {
        self.call(
            uris::registration::GET,
            vec![registration_id.into()],
            Kwargs::new(),
        )
        .await
    }

    /// Lists the session ids of all callees attached to a registration.
    pub async fn list_callees(&self, registration_id: u64) -> Result<Vec<u64>, Error> {
        let value = self
            .meta_call(
                uris::registration::LIST_CALLEES,
                vec![registration_id.into()],
            )
            .await?;
        let Value::Array(elems) = value else {
            return Err(Error::Protocol(
                "wamp.registration.list_callees returned no list".to_owned(),
            ));
        };
        elems
            .iter()
            .map(|elem| {
                elem.as_u64().ok_or_else(|| {
                    Error::Protocol(format!("callee session id {elem} is not an id"))
                })
            })
            .collect()
    }

    /// Counts the callees attached to a registration.
    pub async fn count_callees(&self, registration_id: u64) -> Result<u64, Error> {
        let value = self
            .meta_call(
                uris::registration::COUNT_CALLEES,
                vec![registration_id.into()],
            )
            .await?;
        value.as_u64().ok_or_else(|| {
            Error::Protocol(format!(
                "wamp.registration.count_callees returned {value} instead of a count"
            ))
        })
    }

    /// Calls a meta procedure and extracts the single positional result.
    async fn meta_call(&self, procedure: &str, args: Args) -> Result<Value, Error> {
        let outcome = self.call(procedure, args, Kwargs::new()).await?;
        let mut result = outcome.into_result()?;
        if result.args.is_empty() {
            return Err(Error::Protocol(format!("{procedure} returned no result")));
        }
        Ok(result.args.swap_remove(0))
    }
}

fn optional_id(procedure: &str, value: Value) -> Result<Option<u64>, Error> {
    match value {
        Value::Null => Ok(None),
        other => other.as_u64().map(Some).ok_or_else(|| {
            Error::Protocol(format!("{procedure} returned {other} instead of an id"))
        }),
    }
}
