use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::metadata::{ColumnDef, Entity, EntitySchema, FieldKind};

pub mod position {
    pub const STUDENT: &str = "STUDENT";
    pub const OTHERS: &str = "OTHERS";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub fullname: Option<String>,
    pub bio: String,
    pub avatar: String,
    pub position: String,
    #[serde(default)]
    pub expertises: Vec<String>,
    pub phone_number: Option<String>,
    pub student_id: Option<String>,
    pub major: Option<String>,
    pub year_born: Option<i32>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub achievements: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub static PROFILE: EntitySchema = EntitySchema {
    name: "profile",
    table: "profile",
    primary_key: &["id"],
    columns: &[
        ColumnDef::new("id", "id", FieldKind::Uuid),
        ColumnDef::new("username", "username", FieldKind::Text),
        ColumnDef::new("fullname", "fullname", FieldKind::Text),
        ColumnDef::new("bio", "bio", FieldKind::Text),
        ColumnDef::new("avatar", "avatar", FieldKind::Text),
        ColumnDef::new("position", "position", FieldKind::Text),
        ColumnDef::new("expertises", "expertises", FieldKind::SimpleArray),
        ColumnDef::new("phoneNumber", "phone_number", FieldKind::Text),
        ColumnDef::new("studentId", "student_id", FieldKind::Text),
        ColumnDef::new("major", "major", FieldKind::Text),
        ColumnDef::new("yearBorn", "year_born", FieldKind::Number),
        ColumnDef::new("gender", "gender", FieldKind::Text),
        ColumnDef::new("address", "address", FieldKind::Text),
        ColumnDef::new("achievements", "achievements", FieldKind::Jsonb),
        ColumnDef::new("searchWeights", "search_weights", FieldKind::FullText),
        ColumnDef::new("createdAt", "created_at", FieldKind::Timestamp),
        ColumnDef::new("updatedAt", "updated_at", FieldKind::Timestamp),
        ColumnDef::new("deletedAt", "deleted_at", FieldKind::Timestamp),
    ],
    relations: &[],
};

impl Entity for Profile {
    fn schema() -> &'static EntitySchema {
        &PROFILE
    }
}
