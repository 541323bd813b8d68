use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::project_member::{ProjectMember, PROJECT_MEMBER};
use crate::database::metadata::{ColumnDef, Entity, EntitySchema, FieldKind, RelationDef, RelationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Opening,
    Closed,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub major: Option<Vec<String>>,
    #[serde(default)]
    pub expertises: Vec<String>,
    pub description: Option<Value>,
    pub close_at: Option<DateTime<Utc>>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub members: Vec<ProjectMember>,
}

impl Project {
    pub fn owner(&self) -> Option<&ProjectMember> {
        self.members.iter().find(|member| member.role.is_owner())
    }
}

pub static PROJECT: EntitySchema = EntitySchema {
    name: "project",
    table: "project",
    primary_key: &["id"],
    columns: &[
        ColumnDef::new("id", "id", FieldKind::Uuid),
        ColumnDef::new("name", "name", FieldKind::Text),
        ColumnDef::new("major", "major", FieldKind::Array),
        ColumnDef::new("expertises", "expertises", FieldKind::SimpleArray),
        ColumnDef::new("description", "description", FieldKind::Jsonb),
        ColumnDef::new("closeAt", "close_at", FieldKind::Timestamp),
        ColumnDef::new("status", "status", FieldKind::Text),
        ColumnDef::new("searchWeights", "search_weights", FieldKind::FullText),
        ColumnDef::new("createdAt", "created_at", FieldKind::Timestamp),
        ColumnDef::new("updatedAt", "updated_at", FieldKind::Timestamp),
        ColumnDef::new("deletedAt", "deleted_at", FieldKind::Timestamp),
    ],
    relations: &[RelationDef {
        property: "members",
        kind: RelationKind::OneToMany,
        target: project_member_schema,
        local_column: "id",
        foreign_column: "project_id",
        eager: true,
        cascade_insert: true,
    }],
};

fn project_member_schema() -> &'static EntitySchema {
    &PROJECT_MEMBER
}

impl Entity for Project {
    fn schema() -> &'static EntitySchema {
        &PROJECT
    }
}
