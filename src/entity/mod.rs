//! Typed entities, their identifiers and the remote loader.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SealdexError};

pub mod client;
pub mod id;
pub mod memory;
pub mod model;

pub use client::{EntityClient, EntityRestClient};
pub use id::IdOrdering;
pub use memory::{InjectedFailure, MemoryRestClient};
pub use model::{
    CalendarEvent, Contact, ContactAddress, ContactList, ContactMailAddress, ContactPhoneNumber,
    ContactSocialId, Mail, MailAddress, MailBox,
};

/// Numeric id of an indexed attribute.
pub type AttributeId = u32;

/// The list element kinds this crate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Contact,
    Mail,
    CalendarEvent,
}

impl EntityKind {
    /// Type name as used in storage keys.
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Contact => "Contact",
            EntityKind::Mail => "Mail",
            EntityKind::CalendarEvent => "CalendarEvent",
        }
    }

    /// How element ids of this kind are ordered.
    pub fn id_ordering(&self) -> IdOrdering {
        match self {
            EntityKind::Contact | EntityKind::Mail => IdOrdering::Generated,
            EntityKind::CalendarEvent => IdOrdering::Custom,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Full identity of a list element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTuple {
    pub list_id: String,
    pub element_id: String,
}

impl IdTuple {
    /// Create an id tuple.
    pub fn new<L: Into<String>, E: Into<String>>(list_id: L, element_id: E) -> Self {
        IdTuple {
            list_id: list_id.into(),
            element_id: element_id.into(),
        }
    }

    /// Read the `_id` of a raw instance.
    pub fn from_instance(instance: &Value) -> Result<Self> {
        let id = instance
            .get("_id")
            .ok_or_else(|| SealdexError::encoding("instance has no _id"))?;
        Ok(serde_json::from_value(id.clone())?)
    }
}

impl fmt::Display for IdTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.list_id, self.element_id)
    }
}

/// A list element with a statically known kind.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind of this entity.
    const KIND: EntityKind;

    /// The element's id.
    fn id(&self) -> &IdTuple;

    /// The group that owns the element.
    fn owner_group(&self) -> &str;
}

/// Statically typed accessor for one indexed attribute.
pub struct AttributeHandler<T> {
    /// Attribute id recorded in postings.
    pub attribute: AttributeId,
    /// Attribute name, for logs.
    pub name: &'static str,
    /// Extracts the attribute's indexable text.
    pub value: fn(&T) -> String,
}

/// An entity the search index knows how to index.
pub trait IndexedEntity: Entity {
    /// Accessor table of every indexed attribute, in index order.
    fn attributes() -> &'static [AttributeHandler<Self>];

    /// Words offered as autocomplete suggestions, or `None` when the kind
    /// does not support suggestions.
    fn suggestion_words(&self) -> Option<Vec<String>> {
        None
    }

    /// Element ids of the sets (folders) containing this entity.
    fn set_ids(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_id_tuple_from_instance() {
        let instance = json!({"_id": {"listId": "L", "elementId": "E"}, "x": 1});
        let id = IdTuple::from_instance(&instance).unwrap();
        assert_eq!(id, IdTuple::new("L", "E"));
        assert_eq!(id.to_string(), "L/E");

        assert!(IdTuple::from_instance(&json!({"x": 1})).is_err());
    }

    #[test]
    fn test_kind_orderings() {
        assert_eq!(EntityKind::Mail.id_ordering(), IdOrdering::Generated);
        assert_eq!(EntityKind::CalendarEvent.id_ordering(), IdOrdering::Custom);
        assert_eq!(EntityKind::Contact.to_string(), "Contact");
    }
}
