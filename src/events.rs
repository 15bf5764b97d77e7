//! Entity change events delivered by the remote service.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, IdTuple};

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

/// One change to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    pub operation: OperationType,
    pub kind: EntityKind,
    pub instance_list_id: String,
    pub instance_id: String,
}

impl EntityUpdate {
    pub fn new(
        operation: OperationType,
        kind: EntityKind,
        instance_list_id: &str,
        instance_id: &str,
    ) -> Self {
        EntityUpdate {
            operation,
            kind,
            instance_list_id: instance_list_id.to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    /// Full id of the changed entity.
    pub fn id(&self) -> IdTuple {
        IdTuple::new(self.instance_list_id.clone(), self.instance_id.clone())
    }
}

/// An ordered set of changes for one group, applied as a unit.
///
/// The same batch may be delivered more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub group_id: String,
    pub batch_id: String,
    pub events: Vec<EntityUpdate>,
}

impl EventBatch {
    pub fn new(group_id: &str, batch_id: &str, events: Vec<EntityUpdate>) -> Self {
        EventBatch {
            group_id: group_id.to_string(),
            batch_id: batch_id.to_string(),
            events,
        }
    }

    /// Events concerning `kind`, in delivery order.
    pub fn events_of(&self, kind: EntityKind) -> impl Iterator<Item = &EntityUpdate> {
        self.events.iter().filter(move |event| event.kind == kind)
    }
}

/// Another event of `operation` for the same element of the same kind.
pub fn find_event<'a>(
    events: &'a [EntityUpdate],
    operation: OperationType,
    event: &EntityUpdate,
) -> Option<&'a EntityUpdate> {
    events.iter().find(|other| {
        other.operation == operation
            && other.kind == event.kind
            && other.instance_id == event.instance_id
    })
}

/// Whether `event` is one half of a mail moving between lists, which the
/// server reports as a CREATE and a DELETE of the same mail in one batch.
pub fn is_mail_move(events: &[EntityUpdate], event: &EntityUpdate) -> bool {
    let counterpart = match event.operation {
        OperationType::Create => OperationType::Delete,
        OperationType::Delete => OperationType::Create,
        OperationType::Update => return false,
    };
    event.kind == EntityKind::Mail && find_event(events, counterpart, event).is_some()
}
