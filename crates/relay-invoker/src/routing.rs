//! # Scope Transition and Outbound Keys
//!
//! Decides, for every emitted result, which scope travels with it and which
//! routing key it is published under.
//!
//! ```text
//!  emitted result ──► scope transition ──► key selection ──► cc fan-out
//!                     (auto-exit when the   (override > reply_to > pubtopic)
//!                      request was ours)
//! ```
//!
//! A scope whose `reply_to` overlaps this component's identity keys marks a
//! request addressed to us. Handling it resolves the request, so results are
//! published with the parent scope instead.

use relay_types::{PubTopic, Scope, ScopeChain, SubTopic, Topic, REPLY_TO};

use crate::context::Emitted;

/// Who a running component instance is, for routing purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Logical component name; names the shared queue.
    pub component: String,
    pub instance_id: String,
    pub subtopic: Option<String>,
}

impl Identity {
    pub fn new(
        component: impl Into<String>,
        instance_id: impl Into<String>,
        subtopic: Option<&str>,
    ) -> Self {
        Self {
            component: component.into(),
            instance_id: instance_id.into(),
            subtopic: subtopic.map(str::to_string),
        }
    }

    /// `subtopic ∪ {instance_id}`.
    pub fn keys(&self) -> Topic {
        Topic::parse(self.subtopic.as_deref()).with_key(self.instance_id.as_str())
    }

    pub fn error_name(&self) -> String {
        format!("{}_error", self.component)
    }

    pub fn shared_queue(&self) -> String {
        self.component.clone()
    }

    pub fn instance_queue(&self) -> String {
        format!("{}/{}", self.component, self.instance_id)
    }

    pub fn error_queue(&self) -> String {
        self.error_name()
    }

    /// Binding key of the shared queue, if the component subscribes to anything.
    pub fn shared_binding(&self) -> Option<String> {
        self.subtopic
            .as_deref()
            .filter(|s| !Topic::parse(*s).is_empty())
            .map(|s| SubTopic::parse(s).render())
    }

    pub fn instance_binding(&self) -> String {
        SubTopic::parse(self.instance_id.as_str()).render()
    }

    pub fn error_binding(&self) -> String {
        SubTopic::parse(self.error_name().as_str()).render()
    }
}

/// Where one outbound envelope goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub key: String,
    pub scope: Option<ScopeChain>,
}

impl Route {
    /// The primary key followed by one key per `cc` entry of the outgoing scope.
    pub fn destinations(&self) -> Vec<String> {
        let mut keys = vec![self.key.clone()];
        if let Some(scope) = &self.scope {
            keys.extend(
                scope
                    .current()
                    .cc()
                    .iter()
                    .map(|topic| PubTopic::parse(topic.as_str()).render())
                    .filter(|key| !key.is_empty()),
            );
        }
        keys
    }
}

/// Exit to the parent when the current scope is a request addressed to `identity`.
pub fn transition(identity: &Identity, scope: Option<ScopeChain>) -> Option<ScopeChain> {
    let chain = scope?;
    let addressed_to_us = chain
        .reply_to()
        .is_some_and(|reply_to| Topic::parse(reply_to).overlaps(&identity.keys()));
    if addressed_to_us {
        chain.parent()
    } else {
        Some(chain)
    }
}

/// Route a handler result.
///
/// Key precedence: an explicit override (topic and/or reply_to) first, then
/// the default pubtopic extended with the scope's `reply_to`, then the bare
/// default pubtopic.
pub fn route_output(identity: &Identity, emitted: &Emitted) -> Route {
    let scope = if emitted.opened_scope {
        emitted.scope.clone()
    } else {
        transition(identity, emitted.scope.clone())
    };
    let output = &emitted.output;
    let default_topic = Topic::parse(emitted.pubtopic.as_deref());

    if let Some(reply_to) = &output.reply_to {
        let topic = match &output.topic {
            Some(topic) => Topic::parse(topic.as_str()),
            None => default_topic,
        };
        let child = Scope::new().with_field(REPLY_TO, reply_to.as_str());
        let scope = match scope {
            Some(chain) => chain.child(child),
            None => ScopeChain::root(child),
        };
        return Route {
            key: PubTopic::from(topic).render(),
            scope: Some(scope),
        };
    }

    if let Some(topic) = &output.topic {
        return Route {
            key: PubTopic::parse(topic.as_str()).render(),
            scope,
        };
    }

    let topic = match scope.as_ref().and_then(ScopeChain::reply_to) {
        Some(reply_to) => default_topic.union(&Topic::parse(reply_to)),
        None => default_topic,
    };
    Route {
        key: PubTopic::from(topic).render(),
        scope,
    }
}

/// Route a failure: the error name, extended with the requester's `reply_to`
/// so that whoever is waiting on this scope hears about it.
pub fn route_error(identity: &Identity, scope: Option<ScopeChain>) -> Route {
    let scope = transition(identity, scope);
    let mut topic = Topic::parse(identity.error_name().as_str());
    if let Some(reply_to) = scope.as_ref().and_then(ScopeChain::reply_to) {
        topic = topic.union(&Topic::parse(reply_to));
    }
    Route {
        key: PubTopic::from(topic).render(),
        scope,
    }
}
