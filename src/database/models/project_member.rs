use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::profile::{Profile, PROFILE};
use super::project::PROJECT;
use crate::database::metadata::{ColumnDef, Entity, EntitySchema, FieldKind, RelationDef, RelationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectMemberRole {
    Owner,
    Member,
    GuestMember,
    Invited,
}

impl ProjectMemberRole {
    pub const ACTIVE: [ProjectMemberRole; 2] = [ProjectMemberRole::Owner, ProjectMemberRole::Member];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectMemberRole::Owner => "OWNER",
            ProjectMemberRole::Member => "MEMBER",
            ProjectMemberRole::GuestMember => "GUESTMEMBER",
            ProjectMemberRole::Invited => "INVITED",
        }
    }

    pub fn is_owner(&self) -> bool {
        *self == ProjectMemberRole::Owner
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

/// Membership of one profile in one project; keyed by `(project_id, username)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub project_id: Uuid,
    pub username: String,
    pub role: ProjectMemberRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

pub static PROJECT_MEMBER: EntitySchema = EntitySchema {
    name: "project_member",
    table: "project_member",
    primary_key: &["project_id", "username"],
    columns: &[
        ColumnDef::new("projectId", "project_id", FieldKind::Uuid),
        ColumnDef::new("username", "username", FieldKind::Text),
        ColumnDef::new("role", "role", FieldKind::Text),
        ColumnDef::new("createdAt", "created_at", FieldKind::Timestamp),
        ColumnDef::new("updatedAt", "updated_at", FieldKind::Timestamp),
    ],
    relations: &[
        RelationDef {
            property: "profile",
            kind: RelationKind::ManyToOne,
            target: profile_schema,
            local_column: "username",
            foreign_column: "username",
            eager: false,
            cascade_insert: false,
        },
        RelationDef {
            property: "project",
            kind: RelationKind::ManyToOne,
            target: project_schema,
            local_column: "project_id",
            foreign_column: "id",
            eager: false,
            cascade_insert: false,
        },
    ],
};

fn profile_schema() -> &'static EntitySchema {
    &PROFILE
}

fn project_schema() -> &'static EntitySchema {
    &PROJECT
}

impl Entity for ProjectMember {
    fn schema() -> &'static EntitySchema {
        &PROJECT_MEMBER
    }
}
