//! Route-keyed handler registry.
//!
//! Patterns are normalized to a [`Route`] on registration and on lookup, so
//! `{"a":1,"b":2}` and `{"b":2,"a":1}` resolve to the same handlers.
//!
//! Registration rules:
//! - first registration for a route creates a one-handler chain
//! - an event handler registered on a route whose head is an event handler
//!   is appended to the chain
//! - anything else replaces the chain
//!
//! Chains are shared behind `Arc` and appended copy-on-write, so a dispatch
//! already holding a [`HandlerRef`] keeps the chain it started with.

use std::collections::BTreeMap;
use std::sync::Arc;

use courier_core::{Pattern, Route, normalize, route_from_str};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::handler::{HandlerChain, HandlerRef, RegisteredHandler};

/// Registry mapping routes to handler chains.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: DashMap<Route, Arc<HandlerChain>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `pattern` and return the route it landed on.
    pub fn add(&self, pattern: &Pattern, handler: RegisteredHandler) -> Route {
        let route = normalize(pattern);
        match self.routes.entry(route.clone()) {
            Entry::Occupied(mut existing) => {
                let chains = existing.get().head().is_event_handler() && handler.is_event_handler();
                if chains {
                    Arc::make_mut(existing.get_mut()).push(handler);
                    debug!(%route, len = existing.get().len(), "appended event handler");
                } else {
                    let _ = existing.insert(Arc::new(HandlerChain::single(handler)));
                    debug!(%route, "replaced handler");
                }
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(Arc::new(HandlerChain::single(handler)));
                debug!(%route, "registered handler");
            }
        }
        route
    }

    /// Head of the chain registered for `pattern`.
    pub fn get(&self, pattern: &Pattern) -> Option<HandlerRef> {
        self.lookup(&normalize(pattern))
    }

    /// Head of the chain for a pattern given as text (JSON or plain).
    pub fn get_by_str(&self, pattern: &str) -> Option<HandlerRef> {
        self.lookup(&route_from_str(pattern))
    }

    fn lookup(&self, route: &Route) -> Option<HandlerRef> {
        self.routes
            .get(route)
            .map(|chain| HandlerRef::head(Arc::clone(chain.value())))
    }

    /// Point-in-time copy of every route and its chain, ordered by route.
    pub fn snapshot(&self) -> BTreeMap<Route, Arc<HandlerChain>> {
        self.routes
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// All registered routes (sorted).
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.routes.iter().map(|e| e.key().clone()).collect();
        routes.sort();
        routes
    }

    /// Whether a handler is registered for `pattern`.
    pub fn has_route(&self, pattern: &Pattern) -> bool {
        self.routes.contains_key(&normalize(pattern))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
