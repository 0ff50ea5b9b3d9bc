//! Canonical resource models
//!
//! The API has answered with more than one field naming over time
//! (`profile_id` vs `id`, `loop_name` vs `name`, snake_case vs camelCase).
//! All of that is absorbed here with serde aliases so nothing above this
//! module has to care. Identifiers are accepted as numbers or strings and
//! stored as strings.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "firstName", alias = "first_name")]
    pub first_name: Option<String>,
    #[serde(default, rename = "lastName", alias = "last_name")]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(alias = "profile_id", alias = "profileId", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type", alias = "profile_type", alias = "profileType")]
    pub profile_type: Option<String>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loop {
    #[serde(alias = "loop_id", alias = "loopId", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default, alias = "loop_name", alias = "loopName")]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "transactionType", alias = "transaction_type")]
    pub transaction_type: Option<String>,
    #[serde(default, alias = "lastUpdated", alias = "updated_at")]
    pub updated: Option<String>,
    #[serde(default, rename = "loopUrl", alias = "loop_url")]
    pub loop_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    #[serde(alias = "folder_id", alias = "folderId", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default, alias = "folder_name")]
    pub name: String,
    #[serde(default)]
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(alias = "document_id", alias = "documentId", deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default, alias = "document_name")]
    pub name: String,
    #[serde(default, alias = "createdDate")]
    pub created: Option<String>,
    #[serde(default, alias = "updatedDate")]
    pub updated: Option<String>,
}

/// Either `{"data": T}` or a bare `T`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Payload<T> {
    Enveloped { data: T },
    Bare(T),
}

impl<T> Payload<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Payload::Enveloped { data } => data,
            Payload::Bare(value) => value,
        }
    }
}

fn flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}
