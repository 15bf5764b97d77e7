//! Selection of the range handler for an entity kind.

use std::sync::Arc;

use ahash::AHashMap;

use crate::cache::handler::{
    CustomCalendarEventHandler, DefaultRangeHandler, MailCreateHandler, RangeHandler,
};
use crate::entity::{EntityKind, EntityRestClient};

/// Range handlers keyed by kind, with a fallback for kinds without one.
#[derive(Debug, Clone)]
pub struct RangeHandlerRegistry {
    default: Arc<dyn RangeHandler>,
    handlers: AHashMap<EntityKind, Arc<dyn RangeHandler>>,
}

impl RangeHandlerRegistry {
    /// A registry that uses `default` for every kind.
    pub fn new(default: Arc<dyn RangeHandler>) -> Self {
        RangeHandlerRegistry {
            default,
            handlers: AHashMap::new(),
        }
    }

    /// The standard handlers: custom handling for calendar events, eager
    /// caching of created mails, the default handler otherwise.
    pub fn standard(rest: Arc<dyn EntityRestClient>, load_multiple_limit: usize) -> Self {
        let default = DefaultRangeHandler::new(rest.clone(), load_multiple_limit);
        Self::new(Arc::new(default.clone()))
            .with_handler(
                EntityKind::CalendarEvent,
                Arc::new(CustomCalendarEventHandler::new(rest, load_multiple_limit)),
            )
            .with_handler(EntityKind::Mail, Arc::new(MailCreateHandler::new(default)))
    }

    pub fn with_handler(mut self, kind: EntityKind, handler: Arc<dyn RangeHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: EntityKind) -> &Arc<dyn RangeHandler> {
        self.handlers.get(&kind).unwrap_or(&self.default)
    }

    /// Whether `kind` has a handler of its own.
    pub fn has_custom_handler(&self, kind: EntityKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::MemoryRestClient;
    use crate::events::{EntityUpdate, OperationType};

    #[test]
    fn test_standard_registry() {
        let registry = RangeHandlerRegistry::standard(Arc::new(MemoryRestClient::new()), 100);
        assert!(registry.has_custom_handler(EntityKind::CalendarEvent));
        assert!(registry.has_custom_handler(EntityKind::Mail));
        assert!(!registry.has_custom_handler(EntityKind::Contact));

        let create = |kind| EntityUpdate::new(OperationType::Create, kind, "list", "id");
        assert_eq!(
            registry
                .get(EntityKind::Mail)
                .should_load_on_create_event(&create(EntityKind::Mail)),
            Some(true)
        );
        assert_eq!(
            registry
                .get(EntityKind::Contact)
                .should_load_on_create_event(&create(EntityKind::Contact)),
            None
        );
    }
}
