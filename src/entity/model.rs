//! Entity types indexed and cached by this crate.
//!
//! Each indexed type declares its attributes as a static accessor table,
//! see [`IndexedEntity::attributes`].

use serde::{Deserialize, Serialize};

use crate::analysis::tokenize;
use crate::entity::{AttributeHandler, AttributeId, Entity, EntityKind, IdTuple, IndexedEntity};

/// Attribute ids of [`Contact`].
pub mod contact_attribute {
    use super::AttributeId;

    pub const FIRST_NAME: AttributeId = 1;
    pub const LAST_NAME: AttributeId = 2;
    pub const NICKNAME: AttributeId = 3;
    pub const ROLE: AttributeId = 4;
    pub const TITLE: AttributeId = 5;
    pub const COMMENT: AttributeId = 6;
    pub const COMPANY: AttributeId = 7;
    pub const ADDRESSES: AttributeId = 8;
    pub const MAIL_ADDRESSES: AttributeId = 9;
    pub const PHONE_NUMBERS: AttributeId = 10;
    pub const SOCIAL_IDS: AttributeId = 11;
}

/// Attribute ids of [`Mail`].
pub mod mail_attribute {
    use super::AttributeId;

    pub const SUBJECT: AttributeId = 1;
    pub const TO_RECIPIENTS: AttributeId = 2;
    pub const CC_RECIPIENTS: AttributeId = 3;
    pub const BCC_RECIPIENTS: AttributeId = 4;
    pub const SENDER: AttributeId = 5;
    pub const BODY: AttributeId = 6;
    pub const ATTACHMENTS: AttributeId = 7;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactAddress {
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactMailAddress {
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactPhoneNumber {
    pub number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactSocialId {
    pub social_id: String,
}

/// An address book entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: IdTuple,
    #[serde(rename = "_ownerGroup")]
    pub owner_group: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub addresses: Vec<ContactAddress>,
    #[serde(default)]
    pub mail_addresses: Vec<ContactMailAddress>,
    #[serde(default)]
    pub phone_numbers: Vec<ContactPhoneNumber>,
    #[serde(default)]
    pub social_ids: Vec<ContactSocialId>,
}

impl Contact {
    /// A contact with only its identity and name set.
    pub fn new(id: IdTuple, owner_group: &str, first_name: &str, last_name: &str) -> Self {
        Contact {
            id,
            owner_group: owner_group.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            nickname: None,
            role: String::new(),
            title: None,
            comment: String::new(),
            company: String::new(),
            addresses: Vec::new(),
            mail_addresses: Vec::new(),
            phone_numbers: Vec::new(),
            social_ids: Vec::new(),
        }
    }

    /// Add a mail address.
    pub fn with_mail_address(mut self, address: &str) -> Self {
        self.mail_addresses.push(ContactMailAddress {
            address: address.to_string(),
        });
        self
    }
}

impl Entity for Contact {
    const KIND: EntityKind = EntityKind::Contact;

    fn id(&self) -> &IdTuple {
        &self.id
    }

    fn owner_group(&self) -> &str {
        &self.owner_group
    }
}

const CONTACT_ATTRIBUTES: &[AttributeHandler<Contact>] = &[
    AttributeHandler {
        attribute: contact_attribute::FIRST_NAME,
        name: "firstName",
        value: |c| c.first_name.clone(),
    },
    AttributeHandler {
        attribute: contact_attribute::LAST_NAME,
        name: "lastName",
        value: |c| c.last_name.clone(),
    },
    AttributeHandler {
        attribute: contact_attribute::NICKNAME,
        name: "nickname",
        value: |c| c.nickname.clone().unwrap_or_default(),
    },
    AttributeHandler {
        attribute: contact_attribute::ROLE,
        name: "role",
        value: |c| c.role.clone(),
    },
    AttributeHandler {
        attribute: contact_attribute::TITLE,
        name: "title",
        value: |c| c.title.clone().unwrap_or_default(),
    },
    AttributeHandler {
        attribute: contact_attribute::COMMENT,
        name: "comment",
        value: |c| c.comment.clone(),
    },
    AttributeHandler {
        attribute: contact_attribute::COMPANY,
        name: "company",
        value: |c| c.company.clone(),
    },
    AttributeHandler {
        attribute: contact_attribute::ADDRESSES,
        name: "addresses",
        value: |c| join(c.addresses.iter().map(|a| a.address.as_str())),
    },
    AttributeHandler {
        attribute: contact_attribute::MAIL_ADDRESSES,
        name: "mailAddresses",
        value: |c| join(c.mail_addresses.iter().map(|a| a.address.as_str())),
    },
    AttributeHandler {
        attribute: contact_attribute::PHONE_NUMBERS,
        name: "phoneNumbers",
        value: |c| join(c.phone_numbers.iter().map(|p| p.number.as_str())),
    },
    AttributeHandler {
        attribute: contact_attribute::SOCIAL_IDS,
        name: "socialIds",
        value: |c| join(c.social_ids.iter().map(|s| s.social_id.as_str())),
    },
];

impl IndexedEntity for Contact {
    fn attributes() -> &'static [AttributeHandler<Self>] {
        CONTACT_ATTRIBUTES
    }

    fn suggestion_words(&self) -> Option<Vec<String>> {
        let addresses = self
            .mail_addresses
            .iter()
            .map(|a| a.address.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Some(tokenize(&format!(
            "{} {} {}",
            self.first_name, self.last_name, addresses
        )))
    }
}

/// The address book a group's contacts live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactList {
    #[serde(rename = "_ownerGroup")]
    pub owner_group: String,
    /// List id of the contacts.
    pub contacts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailAddress {
    pub name: String,
    pub address: String,
}

impl MailAddress {
    pub fn new(name: &str, address: &str) -> Self {
        MailAddress {
            name: name.to_string(),
            address: address.to_string(),
        }
    }

    fn indexable(&self) -> String {
        format!("{} <{}>", self.name, self.address)
    }
}

/// A mail with the fields the index covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    #[serde(rename = "_id")]
    pub id: IdTuple,
    #[serde(rename = "_ownerGroup")]
    pub owner_group: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: MailAddress,
    #[serde(default)]
    pub to_recipients: Vec<MailAddress>,
    #[serde(default)]
    pub cc_recipients: Vec<MailAddress>,
    #[serde(default)]
    pub bcc_recipients: Vec<MailAddress>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachment_names: Vec<String>,
    /// Sets (folders) this mail is part of.
    #[serde(default)]
    pub sets: Vec<IdTuple>,
}

impl Mail {
    /// A mail with identity, subject and body.
    pub fn new(id: IdTuple, owner_group: &str, subject: &str, body: &str) -> Self {
        Mail {
            id,
            owner_group: owner_group.to_string(),
            subject: subject.to_string(),
            sender: MailAddress::default(),
            to_recipients: Vec::new(),
            cc_recipients: Vec::new(),
            bcc_recipients: Vec::new(),
            body: body.to_string(),
            attachment_names: Vec::new(),
            sets: Vec::new(),
        }
    }

    /// Put the mail into a set.
    pub fn in_set(mut self, set: IdTuple) -> Self {
        self.sets.push(set);
        self
    }
}

impl Entity for Mail {
    const KIND: EntityKind = EntityKind::Mail;

    fn id(&self) -> &IdTuple {
        &self.id
    }

    fn owner_group(&self) -> &str {
        &self.owner_group
    }
}

const MAIL_ATTRIBUTES: &[AttributeHandler<Mail>] = &[
    AttributeHandler {
        attribute: mail_attribute::SUBJECT,
        name: "subject",
        value: |m| m.subject.clone(),
    },
    AttributeHandler {
        attribute: mail_attribute::TO_RECIPIENTS,
        name: "toRecipients",
        value: |m| recipients(&m.to_recipients),
    },
    AttributeHandler {
        attribute: mail_attribute::CC_RECIPIENTS,
        name: "ccRecipients",
        value: |m| recipients(&m.cc_recipients),
    },
    AttributeHandler {
        attribute: mail_attribute::BCC_RECIPIENTS,
        name: "bccRecipients",
        value: |m| recipients(&m.bcc_recipients),
    },
    AttributeHandler {
        attribute: mail_attribute::SENDER,
        name: "sender",
        value: |m| m.sender.indexable(),
    },
    AttributeHandler {
        attribute: mail_attribute::BODY,
        name: "body",
        value: |m| m.body.clone(),
    },
    AttributeHandler {
        attribute: mail_attribute::ATTACHMENTS,
        name: "attachments",
        value: |m| m.attachment_names.join(" "),
    },
];

impl IndexedEntity for Mail {
    fn attributes() -> &'static [AttributeHandler<Self>] {
        MAIL_ATTRIBUTES
    }

    fn set_ids(&self) -> Vec<String> {
        self.sets.iter().map(|set| set.element_id.clone()).collect()
    }
}

/// The mail lists of one mailbox group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailBox {
    #[serde(rename = "_ownerGroup")]
    pub owner_group: String,
    /// List ids holding the group's mails.
    pub mail_lists: Vec<String>,
}

/// A calendar event. Its element id is a custom id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(rename = "_id")]
    pub id: IdTuple,
    #[serde(rename = "_ownerGroup")]
    pub owner_group: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub uid: Option<String>,
}

impl Entity for CalendarEvent {
    const KIND: EntityKind = EntityKind::CalendarEvent;

    fn id(&self) -> &IdTuple {
        &self.id
    }

    fn owner_group(&self) -> &str {
        &self.owner_group
    }
}

fn join<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(",")
}

fn recipients(addresses: &[MailAddress]) -> String {
    addresses
        .iter()
        .map(MailAddress::indexable)
        .collect::<Vec<_>>()
        .join(",")
}
