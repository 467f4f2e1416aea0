//! The WAMP message model and its JSON list codec.
//!
//! Every message is an ordered JSON array `[code, ...fields]` where `code` is
//! a small integer tag. Decoding dispatches on the tag and validates the
//! positional schema; excess trailing elements are tolerated for forward
//! compatibility, missing required elements are an error.

use std::fmt;

use serde_json::Value;

/// A WAMP `Details`/`Options` dictionary.
pub type Dict = serde_json::Map<String, Value>;
/// Positional call/publish/event arguments.
pub type Args = Vec<Value>;
/// Keyword call/publish/event arguments.
pub type Kwargs = Dict;

/// The integer type tags of the WAMP basic profile, as used by a client peer.
pub mod codes {
    /// `[HELLO, Realm|uri, Details|dict]`
    pub const HELLO: u64 = 1;
    /// `[WELCOME, Session|id, Details|dict]`
    pub const WELCOME: u64 = 2;
    /// `[ABORT, Details|dict, Reason|uri]`
    pub const ABORT: u64 = 3;
    /// `[CHALLENGE, AuthMethod|string, Extra|dict]`
    pub const CHALLENGE: u64 = 4;
    /// `[AUTHENTICATE, Signature|string, Extra|dict]`
    pub const AUTHENTICATE: u64 = 5;
    /// `[GOODBYE, Details|dict, Reason|uri]`
    pub const GOODBYE: u64 = 6;
    /// `[ERROR, ReqType|int, ReqId|id, Details|dict, Error|uri, Args?, Kwargs?]`
    pub const ERROR: u64 = 8;
    /// `[PUBLISH, ReqId|id, Options|dict, Topic|uri, Args?, Kwargs?]`
    pub const PUBLISH: u64 = 16;
    /// `[PUBLISHED, ReqId|id, Publication|id]`
    pub const PUBLISHED: u64 = 17;
    /// `[SUBSCRIBE, ReqId|id, Options|dict, Topic|uri]`
    pub const SUBSCRIBE: u64 = 32;
    /// `[SUBSCRIBED, ReqId|id, Subscription|id]`
    pub const SUBSCRIBED: u64 = 33;
    /// `[UNSUBSCRIBE, ReqId|id, Subscription|id]`
    pub const UNSUBSCRIBE: u64 = 34;
    /// `[UNSUBSCRIBED, ReqId|id]`
    pub const UNSUBSCRIBED: u64 = 35;
    /// `[EVENT, Subscription|id, Publication|id, Details|dict, Args?, Kwargs?]`
    pub const EVENT: u64 = 36;
    /// `[CALL, ReqId|id, Options|dict, Procedure|uri, Args?, Kwargs?]`
    pub const CALL: u64 = 48;
    /// `[RESULT, ReqId|id, Details|dict, Args?, Kwargs?]`
    pub const RESULT: u64 = 50;
    /// `[REGISTER, ReqId|id, Options|dict, Procedure|uri]`
    pub const REGISTER: u64 = 64;
    /// `[REGISTERED, ReqId|id, Registration|id]`
    pub const REGISTERED: u64 = 65;
    /// `[UNREGISTER, ReqId|id, Registration|id]`
    pub const UNREGISTER: u64 = 66;
    /// `[UNREGISTERED, ReqId|id]`
    pub const UNREGISTERED: u64 = 67;
    /// `[INVOCATION, ReqId|id, Registration|id, Details|dict, Args?, Kwargs?]`
    pub const INVOCATION: u64 = 68;
    /// `[YIELD, InvocationId|id, Options|dict, Args?, Kwargs?]`
    pub const YIELD: u64 = 70;
}

/// A message exchanged between a client peer and a router.
///
/// Variants carry their positional fields by name. Optional trailing
/// `args`/`kwargs` decode to empty collections when absent.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Sent by a client to initiate a session on a realm.
    Hello {
        /// The realm to join.
        realm: String,
        /// Session details, including the advertised roles.
        details: Dict,
    },
    /// The router's acknowledgement that the session is established.
    Welcome {
        /// The router-assigned session id.
        session_id: u64,
        /// Router details.
        details: Dict,
    },
    /// Session establishment was refused.
    Abort {
        /// Additional information.
        details: Dict,
        /// The reason URI, e.g. `wamp.error.not_authorized`.
        reason: String,
    },
    /// The router demands authentication before establishing the session.
    Challenge {
        /// The authentication method, e.g. `ticket` or `wampcra`.
        authmethod: String,
        /// Method-specific challenge data.
        extra: Dict,
    },
    /// The client's response to a [`Message::Challenge`].
    Authenticate {
        /// The computed signature.
        signature: String,
        /// Method-specific extra data.
        extra: Dict,
    },
    /// Graceful session close, sent by either peer and echoed by the router.
    Goodbye {
        /// Additional information.
        details: Dict,
        /// The close reason URI, usually `wamp.close.normal`.
        reason: String,
    },
    /// A failure reply correlated to an earlier request.
    Error {
        /// The type tag of the request that failed.
        request_type: u64,
        /// The id of the request that failed.
        request_id: u64,
        /// Additional information.
        details: Dict,
        /// The error URI, e.g. `wamp.error.no_such_registration`.
        error: String,
        /// Positional error arguments.
        args: Args,
        /// Keyword error arguments.
        kwargs: Kwargs,
    },
    /// Publish an event to a topic.
    Publish {
        /// Client-allocated request id.
        request_id: u64,
        /// Publish options; `{"acknowledge": true}` requests a PUBLISHED reply.
        options: Dict,
        /// The topic URI.
        topic: String,
        /// Positional event payload.
        args: Args,
        /// Keyword event payload.
        kwargs: Kwargs,
    },
    /// Acknowledgement of a [`Message::Publish`] with `acknowledge: true`.
    Published {
        /// The request id of the PUBLISH being acknowledged.
        request_id: u64,
        /// The router-assigned publication id.
        publication_id: u64,
    },
    /// Subscribe to a topic.
    Subscribe {
        /// Client-allocated request id.
        request_id: u64,
        /// Subscribe options.
        options: Dict,
        /// The topic URI.
        topic: String,
    },
    /// Acknowledgement of a [`Message::Subscribe`].
    Subscribed {
        /// The request id of the SUBSCRIBE being acknowledged.
        request_id: u64,
        /// The router-assigned subscription id.
        subscription_id: u64,
    },
    /// Remove a subscription.
    Unsubscribe {
        /// Client-allocated request id.
        request_id: u64,
        /// The subscription to remove.
        subscription_id: u64,
    },
    /// Acknowledgement of a [`Message::Unsubscribe`].
    Unsubscribed {
        /// The request id of the UNSUBSCRIBE being acknowledged.
        request_id: u64,
    },
    /// An event delivered on a subscription.
    Event {
        /// The subscription the event was matched against.
        subscription_id: u64,
        /// The id of the originating publication.
        publication_id: u64,
        /// Additional information.
        details: Dict,
        /// Positional event payload.
        args: Args,
        /// Keyword event payload.
        kwargs: Kwargs,
    },
    /// Call a procedure.
    Call {
        /// Client-allocated request id.
        request_id: u64,
        /// Call options.
        options: Dict,
        /// The procedure URI.
        procedure: String,
        /// Positional call arguments.
        args: Args,
        /// Keyword call arguments.
        kwargs: Kwargs,
    },
    /// The successful reply to a [`Message::Call`].
    Result {
        /// The request id of the CALL being answered.
        request_id: u64,
        /// Additional information.
        details: Dict,
        /// Positional result payload.
        args: Args,
        /// Keyword result payload.
        kwargs: Kwargs,
    },
    /// Register a procedure as a callee.
    Register {
        /// Client-allocated request id.
        request_id: u64,
        /// Register options.
        options: Dict,
        /// The procedure URI.
        procedure: String,
    },
    /// Acknowledgement of a [`Message::Register`].
    Registered {
        /// The request id of the REGISTER being acknowledged.
        request_id: u64,
        /// The router-assigned registration id.
        registration_id: u64,
    },
    /// Remove a registration.
    Unregister {
        /// Client-allocated request id.
        request_id: u64,
        /// The registration to remove.
        registration_id: u64,
    },
    /// Acknowledgement of a [`Message::Unregister`].
    Unregistered {
        /// The request id of the UNREGISTER being acknowledged.
        request_id: u64,
    },
    /// A router-dispatched call to one of this peer's registrations.
    Invocation {
        /// Router-allocated invocation id, echoed back in YIELD or ERROR.
        request_id: u64,
        /// The registration being invoked.
        registration_id: u64,
        /// Additional information.
        details: Dict,
        /// Positional call arguments.
        args: Args,
        /// Keyword call arguments.
        kwargs: Kwargs,
    },
    /// The callee's reply to a [`Message::Invocation`].
    Yield {
        /// The invocation id being answered.
        request_id: u64,
        /// Yield options.
        options: Dict,
        /// Positional result payload.
        args: Args,
        /// Keyword result payload.
        kwargs: Kwargs,
    },
}

/// The payload of an ERROR message, delivered to callers as a value so the
/// error URI and arguments can be inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct WampError {
    /// The type tag of the request that failed.
    pub request_type: u64,
    /// The id of the request that failed.
    pub request_id: u64,
    /// Additional information.
    pub details: Dict,
    /// The error URI.
    pub error: String,
    /// Positional error arguments.
    pub args: Args,
    /// Keyword error arguments.
    pub kwargs: Kwargs,
}

impl fmt::Display for WampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(detail) = self.args.first() {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WampError {}

/// Failure to decode an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame payload was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload decoded to something other than a non-empty array.
    #[error("message is not a non-empty JSON array")]
    NotAMessageList,
    /// The type tag is not one this peer knows.
    #[error("unknown message code {0}")]
    UnknownCode(u64),
    /// A required positional element is absent.
    #[error("{name} message is missing element {index} ({field})")]
    MissingField {
        /// The message name.
        name: &'static str,
        /// The zero-based element index.
        index: usize,
        /// What the element holds.
        field: &'static str,
    },
    /// A positional element has the wrong JSON type.
    #[error("{name} message element {index} ({field}) has the wrong type")]
    WrongType {
        /// The message name.
        name: &'static str,
        /// The zero-based element index.
        index: usize,
        /// What the element holds.
        field: &'static str,
    },
}

struct Fields<'a> {
    name: &'static str,
    elems: &'a [Value],
}

impl<'a> Fields<'a> {
    fn get(&self, index: usize, field: &'static str) -> Result<&'a Value, DecodeError> {
        self.elems.get(index).ok_or(DecodeError::MissingField {
            name: self.name,
            index,
            field,
        })
    }

    fn id(&self, index: usize, field: &'static str) -> Result<u64, DecodeError> {
        self.get(index, field)?
            .as_u64()
            .ok_or(DecodeError::WrongType {
                name: self.name,
                index,
                field,
            })
    }

    fn string(&self, index: usize, field: &'static str) -> Result<String, DecodeError> {
        self.get(index, field)?
            .as_str()
            .map(str::to_owned)
            .ok_or(DecodeError::WrongType {
                name: self.name,
                index,
                field,
            })
    }

    fn dict(&self, index: usize, field: &'static str) -> Result<Dict, DecodeError> {
        self.get(index, field)?
            .as_object()
            .cloned()
            .ok_or(DecodeError::WrongType {
                name: self.name,
                index,
                field,
            })
    }

    // args/kwargs are an optional tail; absent decodes to empty.
    fn args(&self, index: usize) -> Result<Args, DecodeError> {
        match self.elems.get(index) {
            None => Ok(Args::new()),
            Some(v) => v.as_array().cloned().ok_or(DecodeError::WrongType {
                name: self.name,
                index,
                field: "args",
            }),
        }
    }

    fn kwargs(&self, index: usize) -> Result<Kwargs, DecodeError> {
        match self.elems.get(index) {
            None => Ok(Kwargs::new()),
            Some(v) => v.as_object().cloned().ok_or(DecodeError::WrongType {
                name: self.name,
                index,
                field: "kwargs",
            }),
        }
    }
}

impl Message {
    /// The integer type tag of this message.
    pub fn code(&self) -> u64 {
        match self {
            Message::Hello { .. } => codes::HELLO,
            Message::Welcome { .. } => codes::WELCOME,
            Message::Abort { .. } => codes::ABORT,
            Message::Challenge { .. } => codes::CHALLENGE,
            Message::Authenticate { .. } => codes::AUTHENTICATE,
            Message::Goodbye { .. } => codes::GOODBYE,
            Message::Error { .. } => codes::ERROR,
            Message::Publish { .. } => codes::PUBLISH,
            Message::Published { .. } => codes::PUBLISHED,
            Message::Subscribe { .. } => codes::SUBSCRIBE,
            Message::Subscribed { .. } => codes::SUBSCRIBED,
            Message::Unsubscribe { .. } => codes::UNSUBSCRIBE,
            Message::Unsubscribed { .. } => codes::UNSUBSCRIBED,
            Message::Event { .. } => codes::EVENT,
            Message::Call { .. } => codes::CALL,
            Message::Result { .. } => codes::RESULT,
            Message::Register { .. } => codes::REGISTER,
            Message::Registered { .. } => codes::REGISTERED,
            Message::Unregister { .. } => codes::UNREGISTER,
            Message::Unregistered { .. } => codes::UNREGISTERED,
            Message::Invocation { .. } => codes::INVOCATION,
            Message::Yield { .. } => codes::YIELD,
        }
    }

    /// The upper-case protocol name of this message, for logging.
    pub fn name(&self) -> &'static str {
        message_name(self.code()).expect("every variant has a name")
    }

    /// Encodes this message as the canonical JSON array.
    ///
    /// `args` is emitted when non-empty or when `kwargs` is non-empty;
    /// `kwargs` only when non-empty.
    pub fn to_value(&self) -> Value {
        let mut elems: Vec<Value> = vec![self.code().into()];
        match self {
            Message::Hello { realm, details } => {
                elems.push(realm.clone().into());
                elems.push(Value::Object(details.clone()));
            }
            Message::Welcome {
                session_id,
                details,
            } => {
                elems.push((*session_id).into());
                elems.push(Value::Object(details.clone()));
            }
            Message::Abort { details, reason } | Message::Goodbye { details, reason } => {
                elems.push(Value::Object(details.clone()));
                elems.push(reason.clone().into());
            }
            Message::Challenge { authmethod, extra } => {
                elems.push(authmethod.clone().into());
                elems.push(Value::Object(extra.clone()));
            }
            Message::Authenticate { signature, extra } => {
                elems.push(signature.clone().into());
                elems.push(Value::Object(extra.clone()));
            }
            Message::Error {
                request_type,
                request_id,
                details,
                error,
                args,
                kwargs,
            } => {
                elems.push((*request_type).into());
                elems.push((*request_id).into());
                elems.push(Value::Object(details.clone()));
                elems.push(error.clone().into());
                push_payload(&mut elems, args, kwargs);
            }
            Message::Publish {
                request_id,
                options,
                topic,
                args,
                kwargs,
            } => {
                elems.push((*request_id).into());
                elems.push(Value::Object(options.clone()));
                elems.push(topic.clone().into());
                push_payload(&mut elems, args, kwargs);
            }
            Message::Published {
                request_id,
                publication_id,
            } => {
                elems.push((*request_id).into());
                elems.push((*publication_id).into());
            }
            Message::Subscribe {
                request_id,
                options,
                topic,
            } => {
                elems.push((*request_id).into());
                elems.push(Value::Object(options.clone()));
                elems.push(topic.clone().into());
            }
            Message::Subscribed {
                request_id,
                subscription_id,
            }
            | Message::Unsubscribe {
                request_id,
                subscription_id,
            } => {
                elems.push((*request_id).into());
                elems.push((*subscription_id).into());
            }
            Message::Unsubscribed { request_id } => {
                elems.push((*request_id).into());
            }
            Message::Event {
                subscription_id,
                publication_id,
                details,
                args,
                kwargs,
            } => {
                elems.push((*subscription_id).into());
                elems.push((*publication_id).into());
                elems.push(Value::Object(details.clone()));
                push_payload(&mut elems, args, kwargs);
            }
            Message::Call {
                request_id,
                options,
                procedure,
                args,
                kwargs,
            } => {
                elems.push((*request_id).into());
                elems.push(Value::Object(options.clone()));
                elems.push(procedure.clone().into());
                push_payload(&mut elems, args, kwargs);
            }
            Message::Result {
                request_id,
                details,
                args,
                kwargs,
            } => {
                elems.push((*request_id).into());
                elems.push(Value::Object(details.clone()));
                push_payload(&mut elems, args, kwargs);
            }
            Message::Register {
                request_id,
                options,
                procedure,
            } => {
                elems.push((*request_id).into());
                elems.push(Value::Object(options.clone()));
                elems.push(procedure.clone().into());
            }
            Message::Registered {
                request_id,
                registration_id,
            } => {
                elems.push((*request_id).into());
                elems.push((*registration_id).into());
            }
            Message::Unregister {
                request_id,
                registration_id,
            } => {
                elems.push((*request_id).into());
                elems.push((*registration_id).into());
            }
            Message::Unregistered { request_id } => {
                elems.push((*request_id).into());
            }
            Message::Invocation {
                request_id,
                registration_id,
                details,
                args,
                kwargs,
            } => {
                elems.push((*request_id).into());
                elems.push((*registration_id).into());
                elems.push(Value::Object(details.clone()));
                push_payload(&mut elems, args, kwargs);
            }
            Message::Yield {
                request_id,
                options,
                args,
                kwargs,
            } => {
                elems.push((*request_id).into());
                elems.push(Value::Object(options.clone()));
                push_payload(&mut elems, args, kwargs);
            }
        }
        Value::Array(elems)
    }

    /// Serializes this message to its wire form, a JSON array string.
    pub fn to_wire(&self) -> String {
        self.to_value().to_string()
    }

    /// Decodes a message from the payload of a text frame.
    pub fn from_wire(payload: &str) -> Result<Message, DecodeError> {
        Message::from_value(serde_json::from_str(payload)?)
    }

    /// Decodes a message from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Message, DecodeError> {
        let elems = match value {
            Value::Array(elems) if !elems.is_empty() => elems,
            _ => return Err(DecodeError::NotAMessageList),
        };
        let code = elems[0].as_u64().ok_or(DecodeError::NotAMessageList)?;
        let name = message_name(code).ok_or(DecodeError::UnknownCode(code))?;
        let f = Fields {
            name,
            elems: &elems[1..],
        };

        let message = match code {
            codes::HELLO => Message::Hello {
                realm: f.string(0, "realm")?,
                details: f.dict(1, "details")?,
            },
            codes::WELCOME => Message::Welcome {
                session_id: f.id(0, "session id")?,
                details: f.dict(1, "details")?,
            },
            codes::ABORT => Message::Abort {
                details: f.dict(0, "details")?,
                reason: f.string(1, "reason")?,
            },
            codes::CHALLENGE => Message::Challenge {
                authmethod: f.string(0, "authmethod")?,
                extra: f.dict(1, "extra")?,
            },
            codes::AUTHENTICATE => Message::Authenticate {
                signature: f.string(0, "signature")?,
                extra: f.dict(1, "extra")?,
            },
            codes::GOODBYE => Message::Goodbye {
                details: f.dict(0, "details")?,
                reason: f.string(1, "reason")?,
            },
            codes::ERROR => Message::Error {
                request_type: f.id(0, "request type")?,
                request_id: f.id(1, "request id")?,
                details: f.dict(2, "details")?,
                error: f.string(3, "error uri")?,
                args: f.args(4)?,
                kwargs: f.kwargs(5)?,
            },
            codes::PUBLISH => Message::Publish {
                request_id: f.id(0, "request id")?,
                options: f.dict(1, "options")?,
                topic: f.string(2, "topic")?,
                args: f.args(3)?,
                kwargs: f.kwargs(4)?,
            },
            codes::PUBLISHED => Message::Published {
                request_id: f.id(0, "request id")?,
                publication_id: f.id(1, "publication id")?,
            },
            codes::SUBSCRIBE => Message::Subscribe {
                request_id: f.id(0, "request id")?,
                options: f.dict(1, "options")?,
                topic: f.string(2, "topic")?,
            },
            codes::SUBSCRIBED => Message::Subscribed {
                request_id: f.id(0, "request id")?,
                subscription_id: f.id(1, "subscription id")?,
            },
            codes::UNSUBSCRIBE => Message::Unsubscribe {
                request_id: f.id(0, "request id")?,
                subscription_id: f.id(1, "subscription id")?,
            },
            codes::UNSUBSCRIBED => Message::Unsubscribed {
                request_id: f.id(0, "request id")?,
            },
            codes::EVENT => Message::Event {
                subscription_id: f.id(0, "subscription id")?,
                publication_id: f.id(1, "publication id")?,
                details: f.dict(2, "details")?,
                args: f.args(3)?,
                kwargs: f.kwargs(4)?,
            },
            codes::CALL => Message::Call {
                request_id: f.id(0, "request id")?,
                options: f.dict(1, "options")?,
                procedure: f.string(2, "procedure")?,
                args: f.args(3)?,
                kwargs: f.kwargs(4)?,
            },
            codes::RESULT => Message::Result {
                request_id: f.id(0, "request id")?,
                details: f.dict(1, "details")?,
                args: f.args(2)?,
                kwargs: f.kwargs(3)?,
            },
            codes::REGISTER => Message::Register {
                request_id: f.id(0, "request id")?,
                options: f.dict(1, "options")?,
                procedure: f.string(2, "procedure")?,
            },
            codes::REGISTERED => Message::Registered {
                request_id: f.id(0, "request id")?,
                registration_id: f.id(1, "registration id")?,
            },
            codes::UNREGISTER => Message::Unregister {
                request_id: f.id(0, "request id")?,
                registration_id: f.id(1, "registration id")?,
            },
            codes::UNREGISTERED => Message::Unregistered {
                request_id: f.id(0, "request id")?,
            },
            codes::INVOCATION => Message::Invocation {
                request_id: f.id(0, "request id")?,
                registration_id: f.id(1, "registration id")?,
                details: f.dict(2, "details")?,
                args: f.args(3)?,
                kwargs: f.kwargs(4)?,
            },
            codes::YIELD => Message::Yield {
                request_id: f.id(0, "invocation id")?,
                options: f.dict(1, "options")?,
                args: f.args(2)?,
                kwargs: f.kwargs(3)?,
            },
            _ => return Err(DecodeError::UnknownCode(code)),
        };
        Ok(message)
    }
}

fn push_payload(elems: &mut Vec<Value>, args: &Args, kwargs: &Kwargs) {
    if !args.is_empty() || !kwargs.is_empty() {
        elems.push(Value::Array(args.clone()));
    }
    if !kwargs.is_empty() {
        elems.push(Value::Object(kwargs.clone()));
    }
}

fn message_name(code: u64) -> Option<&'static str> {
    let name = match code {
        codes::HELLO => "HELLO",
        codes::WELCOME => "WELCOME",
        codes::ABORT => "ABORT",
        codes::CHALLENGE => "CHALLENGE",
        codes::AUTHENTICATE => "AUTHENTICATE",
        codes::GOODBYE => "GOODBYE",
        codes::ERROR => "ERROR",
        codes::PUBLISH => "PUBLISH",
        codes::PUBLISHED => "PUBLISHED",
        codes::SUBSCRIBE => "SUBSCRIBE",
        codes::SUBSCRIBED => "SUBSCRIBED",
        codes::UNSUBSCRIBE => "UNSUBSCRIBE",
        codes::UNSUBSCRIBED => "UNSUBSCRIBED",
        codes::EVENT => "EVENT",
        codes::CALL => "CALL",
        codes::RESULT => "RESULT",
        codes::REGISTER => "REGISTER",
        codes::REGISTERED => "REGISTERED",
        codes::UNREGISTER => "UNREGISTER",
        codes::UNREGISTERED => "UNREGISTERED",
        codes::INVOCATION => "INVOCATION",
        codes::YIELD => "YIELD",
        _ => return None,
    };
    Some(name)
}
