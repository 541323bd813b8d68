use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::crud::{
    ApiCrud, CrudError, CrudHooks, CrudOptions, DeleteOptions, FindOptions, RootPagination, ValidateOptions, ValidationContext,
};
use crate::database::models::{Project, ProjectMemberRole, ProjectStatus};
use crate::database::paginated::WithMeta;
use crate::database::query_builder::{Conditions, FieldRef, Predicate, QueryExtension, RelationOption};
use crate::filter::QueryParams;
use crate::middleware::AuthUser;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProjectDto {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expertises: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProjectDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expertises: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

/// Caller plus the membership level a mutation needs.
#[derive(Debug, Clone)]
pub struct ProjectAccess {
    pub user: AuthUser,
    /// `Owner` admits only the owner, `Member` admits owner and members
    pub required: ProjectMemberRole,
}

impl ProjectAccess {
    pub fn owner(user: &AuthUser) -> Self {
        Self { user: user.clone(), required: ProjectMemberRole::Owner }
    }

    pub fn member(user: &AuthUser) -> Self {
        Self { user: user.clone(), required: ProjectMemberRole::Member }
    }
}

fn project_role_check(ctx: &ValidationContext<'_, Project, ProjectAccess>) -> bool {
    let access = ctx.context;
    if access.user.is_admin() {
        return true;
    }
    let Some(project) = ctx.entity else {
        return false;
    };
    project.members.iter().filter(|member| member.username == access.user.username).any(|member| match access.required {
        ProjectMemberRole::Owner => member.role.is_owner(),
        _ => member.role.is_active(),
    })
}

#[derive(Clone)]
pub struct ProjectService {
    crud: ApiCrud<Project, ProjectAccess>,
}

impl ProjectService {
    pub fn new(pool: PgPool) -> Result<Self, CrudError> {
        let options = CrudOptions::new("project")
            .relation(RelationOption::new("members", "members").nested(RelationOption::new("profile", "profile")));
        let crud = ApiCrud::new(pool, options)?.with_hooks(CrudHooks::new(project_role_check));
        Ok(Self { crud })
    }

    pub fn crud(&self) -> &ApiCrud<Project, ProjectAccess> {
        &self.crud
    }

    /// Projects page by project; each carries only the owner and the caller's own membership.
    pub async fn get_projects(&self, user: &AuthUser, params: QueryParams) -> Result<WithMeta<Project>, CrudError> {
        let visible_members = QueryExtension::and_where(Predicate::or(vec![
            FieldRef::new("members", "username").equals(user.username.as_str()),
            FieldRef::new("members", "role").equals(ProjectMemberRole::Owner.as_str()),
        ]));
        self.crud.get_many_by_relations_with_meta(&params, &[visible_members], &RootPagination::default()).await
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project, CrudError> {
        let params = QueryParams::new().with_filter("id", id.to_string());
        self.crud.find_one_by_params_with_default_relations(&params, &[], &[]).await
    }

    /// New projects open with the caller as their only member, the owner.
    pub async fn create(&self, user: &AuthUser, dto: CreateProjectDto) -> Result<Project, CrudError> {
        let mut record = match serde_json::to_value(&dto) {
            Ok(Value::Object(map)) => map,
            _ => return Err(CrudError::bad_request("Invalid project payload")),
        };
        record.insert("status".into(), json!(ProjectStatus::Opening));
        record.insert("members".into(), json!([{ "username": user.username, "role": ProjectMemberRole::Owner }]));

        let project = self.crud.create(&record, ValidateOptions::new()).await?;
        tracing::info!("{} created project {}", user.username, project.id);
        Ok(project)
    }

    pub async fn update(&self, user: &AuthUser, id: Uuid, dto: UpdateProjectDto) -> Result<Project, CrudError> {
        let conditions = Conditions::new().with("id", id.to_string());
        let validate = ValidateOptions::with_context(ProjectAccess::owner(user));
        self.crud.update_one_by_conditions(&dto, &conditions, &FindOptions::default(), validate).await
    }

    /// Soft delete; the row stays readable with `with_deleted`.
    pub async fn delete(&self, user: &AuthUser, id: Uuid) -> Result<(), CrudError> {
        let conditions = Conditions::new().with("id", id.to_string());
        let validate = ValidateOptions::with_context(ProjectAccess::owner(user));
        self.crud.delete_one_by_conditions(&conditions, &FindOptions::default(), validate, DeleteOptions::soft()).await?;
        tracing::info!("{} deleted project {}", user.username, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccountRole;
    use crate::database::models::ProjectMember;

    fn user(name: &str, role: AccountRole) -> AuthUser {
        AuthUser { username: name.into(), role }
    }

    fn member(name: &str, role: ProjectMemberRole) -> ProjectMember {
        ProjectMember {
            project_id: Uuid::nil(),
            username: name.into(),
            role,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            profile: None,
        }
    }

    fn project(members: Vec<ProjectMember>) -> Project {
        Project {
            id: Uuid::nil(),
            name: "p".into(),
            major: None,
            expertises: vec![],
            description: None,
            close_at: None,
            status: ProjectStatus::Opening,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            members,
        }
    }

    fn allowed(project: &Project, access: ProjectAccess) -> bool {
        project_role_check(&ValidationContext { entity: Some(project), context: &access })
    }

    #[test]
    fn owner_requirement_rejects_plain_members() {
        let p = project(vec![member("ann", ProjectMemberRole::Owner), member("bob", ProjectMemberRole::Member)]);
        assert!(allowed(&p, ProjectAccess::owner(&user("ann", AccountRole::User))));
        assert!(!allowed(&p, ProjectAccess::owner(&user("bob", AccountRole::User))));
        assert!(allowed(&p, ProjectAccess::member(&user("bob", AccountRole::User))));
    }

    #[test]
    fn pending_memberships_do_not_count() {
        let p = project(vec![member("cat", ProjectMemberRole::Invited), member("dan", ProjectMemberRole::GuestMember)]);
        assert!(!allowed(&p, ProjectAccess::member(&user("cat", AccountRole::User))));
        assert!(!allowed(&p, ProjectAccess::member(&user("dan", AccountRole::User))));
    }

    #[test]
    fn admins_pass_without_membership() {
        let p = project(vec![]);
        assert!(allowed(&p, ProjectAccess::owner(&user("root", AccountRole::Admin))));
        let none = ProjectAccess::owner(&user("eve", AccountRole::User));
        assert!(!project_role_check(&ValidationContext { entity: None, context: &none }));
    }
}
