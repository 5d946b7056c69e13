//! Postman contract: maps an inbound packet to a local handler.
//!
//! Applications normally generate their postman from a routing table.
//! [`ActionTable`] is the hand-populated version.

use std::collections::{HashMap, HashSet};

use crate::packet::{Header, Payload};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverInfo {
    /// A handler consumed the packet.
    Ok,
    /// Component is known, identifier is not.
    NoAction,
    /// Destination is not hosted on this node.
    NoComponent,
}

pub trait Postman {
    fn deliver_packet(&mut self, header: &Header, payload: &Payload) -> DeliverInfo;

    fn is_component_available(&self, component: u8) -> bool;
}

pub type Handler = Box<dyn FnMut(&Header, &Payload) + Send>;

/// Postman backed by hash maps of boxed handlers.
///
/// Actions are keyed by `(component, identifier)`; events (destination 0) by
/// identifier alone, since they have no single target component.
#[derive(Default)]
pub struct ActionTable {
    components: HashSet<u8>,
    actions: HashMap<(u8, u8), Handler>,
    events: HashMap<u8, Handler>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a component as hosted here without giving it any actions.
    pub fn add_component(&mut self, component: u8) -> &mut Self {
        self.components.insert(component);
        self
    }

    pub fn on_action(
        &mut self,
        component: u8,
        identifier: u8,
        handler: impl FnMut(&Header, &Payload) + Send + 'static,
    ) -> &mut Self {
        self.components.insert(component);
        self.actions.insert((component, identifier), Box::new(handler));
        self
    }

    pub fn on_event(
        &mut self,
        identifier: u8,
        handler: impl FnMut(&Header, &Payload) + Send + 'static,
    ) -> &mut Self {
        self.events.insert(identifier, Box::new(handler));
        self
    }

    pub fn components(&self) -> impl Iterator<Item = u8> + '_ {
        self.components.iter().copied()
    }
}

impl Postman for ActionTable {
    fn deliver_packet(&mut self, header: &Header, payload: &Payload) -> DeliverInfo {
        if header.is_event() {
            return match self.events.get_mut(&header.identifier) {
                Some(handler) => {
                    handler(header, payload);
                    DeliverInfo::Ok
                }
                None => DeliverInfo::NoAction,
            };
        }
        if !self.components.contains(&header.destination) {
            return DeliverInfo::NoComponent;
        }
        match self.actions.get_mut(&(header.destination, header.identifier)) {
            Some(handler) => {
                handler(header, payload);
                DeliverInfo::Ok
            }
            None => DeliverInfo::NoAction,
        }
    }

    fn is_component_available(&self, component: u8) -> bool {
        self.components.contains(&component)
    }
}

impl std::fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTable")
            .field("components", &self.components)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}
