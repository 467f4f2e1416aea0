//! Well-known WAMP URIs used by a client peer.

/// Graceful close requested by the peer.
pub const CLOSE_NORMAL: &str = "wamp.close.normal";
/// Close because the other peer said goodbye first.
pub const CLOSE_GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";

/// The called procedure has no registration on the dealer.
pub const ERROR_NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
/// The referenced registration does not exist on the dealer.
pub const ERROR_NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
/// The referenced subscription does not exist on the broker.
pub const ERROR_NO_SUCH_SUBSCRIPTION: &str = "wamp.error.no_such_subscription";
/// An invocation handler failed while producing its result.
pub const ERROR_RUNTIME_ERROR: &str = "wamp.error.runtime_error";
/// The router refused the session or the operation.
pub const ERROR_NOT_AUTHORIZED: &str = "wamp.error.not_authorized";

/// Meta procedures of the dealer registration API, called as ordinary RPCs.
pub mod registration {
    /// `() -> {exact: [id], prefix: [id], wildcard: [id]}`
    pub const LIST: &str = "wamp.registration.list";
    /// `(procedure) -> id | null`
    pub const LOOKUP: &str = "wamp.registration.lookup";
    /// `(procedure) -> id | null`
    pub const MATCH: &str = "wamp.registration.match";
    /// `(id) -> {id, created, uri, match, invoke}`
    pub const GET: &str = "wamp.registration.get";
    /// `(id) -> [session_id]`
    pub const LIST_CALLEES: &str = "wamp.registration.list_callees";
    /// `(id) -> integer`
    pub const COUNT_CALLEES: &str = "wamp.registration.count_callees";

    /// Fired when a URI first acquires a registration.
    pub const ON_CREATE: &str = "wamp.registration.on_create";
    /// Fired when a callee session joins a registration.
    pub const ON_REGISTER: &str = "wamp.registration.on_register";
    /// Fired when a callee session leaves a registration.
    pub const ON_UNREGISTER: &str = "wamp.registration.on_unregister";
}
