//! Core data model.
//!
//! A membership record comes from the system of record; an access user,
//! credential and group binding are what it becomes on the access-control
//! system. A work item is one entity that must pass through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Brivo credential format "Unknown Format".
pub const UNKNOWN_CREDENTIAL_FORMAT: i64 = 110;

// ---------------------------------------------------------------------------
// Membership record
// ---------------------------------------------------------------------------

/// A client record from the membership system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Member {
    /// Barcode ID. Links the member to the access-control user and credential.
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "UniqueId", default)]
    pub unique_id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub middle_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub mobile_phone: String,
    #[serde(default)]
    pub home_phone: String,
    #[serde(default)]
    pub work_phone: String,
    #[serde(default)]
    pub active: bool,
    /// Declined, Non-Member, Active, Expired, Suspended, Terminated.
    #[serde(default)]
    pub status: String,
}

impl Member {
    pub fn is_active_member(&self) -> bool {
        self.active && self.status == "Active"
    }
}

/// Identifier validity predicate applied before an entity enters the pipeline.
///
/// The barcode must be non-empty hexadecimal and, when a facility code is
/// configured, start with that code.
pub fn is_valid_id(facility_code: Option<&str>, id: &str) -> bool {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    match facility_code {
        Some(code) => id.to_ascii_lowercase().starts_with(&code.to_ascii_lowercase()),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Access-control records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub number: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A custom field value attached to an access-control user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub id: i64,
    #[serde(default)]
    pub value: String,
}

/// Looks up a custom field value by field id.
pub fn field_value(fields: &[CustomFieldValue], field_id: i64) -> Option<&str> {
    fields
        .iter()
        .find(|f| f.id == field_id)
        .map(|f| f.value.as_str())
}

/// The user shape written to the access-control system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessUser {
    pub external_id: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub suspended: bool,
    pub emails: Vec<Email>,
    pub phone_numbers: Vec<PhoneNumber>,
    /// Written by the attribute step, not with the user body.
    #[serde(skip)]
    pub custom_fields: Vec<CustomFieldValue>,
}

/// Which custom fields carry the mirrored attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub barcode_field_id: i64,
    pub user_type_field_id: i64,
}

impl AccessUser {
    /// Map a membership record to the access-control user shape.
    pub fn from_member(member: &Member, fields: FieldMapping) -> Self {
        let mut phone_numbers = Vec::new();
        for (number, kind) in [
            (&member.home_phone, "home"),
            (&member.mobile_phone, "mobile"),
            (&member.work_phone, "work"),
        ] {
            if !number.is_empty() {
                phone_numbers.push(PhoneNumber {
                    number: number.clone(),
                    kind: kind.to_string(),
                });
            }
        }

        let emails = if member.email.is_empty() {
            Vec::new()
        } else {
            vec![Email {
                address: member.email.clone(),
                kind: "home".to_string(),
            }]
        };

        Self {
            external_id: member.id.clone(),
            first_name: member.first_name.clone(),
            middle_name: member.middle_name.clone(),
            last_name: member.last_name.clone(),
            suspended: !member.is_active_member(),
            emails,
            phone_numbers,
            custom_fields: vec![
                CustomFieldValue {
                    id: fields.barcode_field_id,
                    value: member.id.clone(),
                },
                CustomFieldValue {
                    id: fields.user_type_field_id,
                    value: member.status.clone(),
                },
            ],
        }
    }
}

/// A credential to create on the access-control system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCredential {
    pub credential_format: CredentialFormat,
    pub reference_id: String,
    pub encoded_credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialFormat {
    pub id: i64,
}

impl NewCredential {
    /// Barcode credential: hex-encoded barcode, referenced by the barcode.
    pub fn for_barcode(barcode: &str) -> Self {
        Self {
            credential_format: CredentialFormat {
                id: UNKNOWN_CREDENTIAL_FORMAT,
            },
            reference_id: barcode.to_string(),
            encoded_credential: hex::encode(barcode.as_bytes()),
        }
    }
}

/// A user as listed by the access-control system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub suspended: bool,
}

/// A credential as listed by the access-control system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCredential {
    pub id: i64,
    #[serde(default)]
    pub reference_id: String,
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Barcodes collected while purging users, consulted when purging credentials.
#[derive(Debug, Default)]
pub struct Harvest {
    barcodes: Mutex<HashSet<String>>,
}

impl Harvest {
    pub fn insert(&self, barcode: impl Into<String>) {
        let mut barcodes = self.barcodes.lock().unwrap_or_else(|e| e.into_inner());
        barcodes.insert(barcode.into());
    }

    pub fn contains(&self, barcode: &str) -> bool {
        let barcodes = self.barcodes.lock().unwrap_or_else(|e| e.into_inner());
        barcodes.contains(barcode)
    }

    pub fn len(&self) -> usize {
        let barcodes = self.barcodes.lock().unwrap_or_else(|e| e.into_inner());
        barcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the pipeline must do for one entity.
#[derive(Debug, Clone)]
pub enum Job {
    /// Create or update the user, its attributes, credential and bindings.
    Provision { user: AccessUser, group_id: i64 },
    /// Read the user's barcode into the harvest, then delete the user.
    PurgeUser {
        user_id: i64,
        barcode_field_id: i64,
        harvest: Arc<Harvest>,
    },
    /// Delete a credential.
    PurgeCredential { credential_id: i64 },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Provision { .. } => "provision",
            Job::PurgeUser { .. } => "purge_user",
            Job::PurgeCredential { .. } => "purge_credential",
        }
    }
}

/// One entity that must pass through the pipeline.
///
/// Carries everything needed to restart the pipeline from the first step;
/// no partial progress survives a requeue.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Unique per run. Used as the outcome ledger key.
    pub key: String,
    pub job: Job,
    /// Number of times this item went through the requeue buffer.
    pub requeues: u32,
}

impl WorkItem {
    pub fn provision(user: AccessUser, group_id: i64) -> Self {
        Self {
            key: user.external_id.clone(),
            job: Job::Provision { user, group_id },
            requeues: 0,
        }
    }

    pub fn purge_user(user_id: i64, barcode_field_id: i64, harvest: Arc<Harvest>) -> Self {
        Self {
            key: format!("user:{user_id}"),
            job: Job::PurgeUser {
                user_id,
                barcode_field_id,
                harvest,
            },
            requeues: 0,
        }
    }

    pub fn purge_credential(credential_id: i64) -> Self {
        Self {
            key: format!("credential:{credential_id}"),
            job: Job::PurgeCredential { credential_id },
            requeues: 0,
        }
    }

    /// Override the ledger key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}
