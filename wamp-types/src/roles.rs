//! The client roles advertised during session establishment.

use serde_json::{Value, json};

use crate::message::Dict;

/// The four WAMP client roles this peer can announce in its HELLO.
///
/// All roles are enabled by default; a peer that only publishes can switch
/// the rest off to keep its HELLO honest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSet {
    /// Issue CALLs and await RESULTs.
    pub caller: bool,
    /// Register procedures and answer INVOCATIONs.
    pub callee: bool,
    /// Publish events to topics.
    pub publisher: bool,
    /// Subscribe to topics and receive EVENTs.
    pub subscriber: bool,
}

impl Default for RoleSet {
    fn default() -> Self {
        Self {
            caller: true,
            callee: true,
            publisher: true,
            subscriber: true,
        }
    }
}

impl RoleSet {
    /// Builds the `roles` map placed in the HELLO details.
    pub fn hello_details(&self) -> Dict {
        let mut roles = Dict::new();
        if self.caller {
            roles.insert("caller".to_owned(), json!({}));
        }
        if self.callee {
            roles.insert("callee".to_owned(), json!({"features": {}}));
        }
        if self.publisher {
            roles.insert("publisher".to_owned(), json!({}));
        }
        if self.subscriber {
            roles.insert("subscriber".to_owned(), json!({}));
        }
        let mut details = Dict::new();
        details.insert("roles".to_owned(), Value::Object(roles));
        details
    }
}
