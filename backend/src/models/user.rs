//! Identity snapshot of the authenticated user attached to audit records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Profile keys written into `user_info`, in record order.
pub const PROFILE_FIELDS: [&str; 7] = [
    "title",
    "email",
    "first_name",
    "middle_name",
    "last_name",
    "sex",
    "date_of_birth",
];

/// Per-request identity plus profile snapshot.
///
/// Every attribute is optional; hosts fill in what their user model has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub sex: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl UserContext {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Returns `(user_id, user_info)` with `""` substituted for absent
    /// attributes.
    pub fn details(&self) -> (String, Map<String, Value>) {
        let id = self.id.clone().unwrap_or_default();
        let mut info = Map::new();
        for field in PROFILE_FIELDS {
            let value = match field {
                "title" => self.title.clone(),
                "email" => self.email.clone(),
                "first_name" => self.first_name.clone(),
                "middle_name" => self.middle_name.clone(),
                "last_name" => self.last_name.clone(),
                "sex" => self.sex.clone(),
                "date_of_birth" => self.date_of_birth.map(|date| date.to_string()),
                _ => None,
            };
            info.insert(field.to_string(), Value::String(value.unwrap_or_default()));
        }
        (id, info)
    }
}
