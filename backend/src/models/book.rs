use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::repositories::events::AuditModel;
use crate::services::formatter::value::serialize_audit;
use crate::types::AuthorId;

/// A book; its numeric id is assigned by the store on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
    pub author_id: AuthorId,
    pub published: bool,
    #[serde(default, serialize_with = "serialize_audit")]
    pub price: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn new(title: String, author_id: AuthorId, published: bool) -> Self {
        Self {
            id: None,
            title,
            author_id,
            published,
            price: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_price(mut self, price: Option<BigDecimal>) -> Self {
        self.price = price;
        self
    }
}

impl AuditModel for Book {
    const IDENTITY: &'static str = "publications.Book";

    fn instance_id(&self) -> Option<String> {
        self.id.map(|id| id.to_string())
    }

    fn assign_id(&mut self, sequence: u64) {
        if self.id.is_none() {
            self.id = i64::try_from(sequence).ok();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBookPayload {
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    pub author_id: AuthorId,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub price: Option<BigDecimal>,
}

impl From<CreateBookPayload> for Book {
    fn from(payload: CreateBookPayload) -> Self {
        Book::new(payload.title, payload.author_id, payload.published).with_price(payload.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkCreateBooksPayload {
    #[validate(length(min = 1), nested)]
    pub books: Vec<CreateBookPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoAuthorsPayload {
    pub author_ids: Vec<AuthorId>,
}
