use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::repositories::events::AuditModel;
use crate::types::AuthorId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
    pub experience: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Author {
    pub fn new(name: String, experience: u32) -> Self {
        let now = Utc::now();
        Self {
            id: AuthorId::new(),
            name,
            experience,
            created_at: now,
            updated_at: now,
        }
    }
}

impl AuditModel for Author {
    const IDENTITY: &'static str = "publications.Author";

    fn instance_id(&self) -> Option<String> {
        Some(self.id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAuthorPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    #[validate(range(max = 100))]
    pub experience: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateAuthorPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(range(max = 100))]
    pub experience: Option<u32>,
}

impl UpdateAuthorPayload {
    pub fn apply(self, author: &mut Author) {
        if let Some(name) = self.name {
            author.name = name;
        }
        if let Some(experience) = self.experience {
            author.experience = experience;
        }
        author.updated_at = Utc::now();
    }
}

/// Sets the same experience on several authors in one write.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkExperiencePayload {
    #[validate(length(min = 1))]
    pub author_ids: Vec<AuthorId>,
    #[validate(range(max = 100))]
    pub experience: u32,
}
