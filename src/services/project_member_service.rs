use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::crud::{ApiCrud, CrudError, CrudHooks, CrudOptions, DeleteOptions, FindOptions, ValidateOptions, ValidationContext};
use crate::database::models::project_member::PROJECT_MEMBER;
use crate::database::models::{ProjectMember, ProjectMemberRole};
use crate::database::paginated::WithMeta;
use crate::database::query_builder::{Conditions, FieldRef, Predicate, QueryExtension, RelationOption};
use crate::filter::QueryParams;
use crate::middleware::AuthUser;

const ALIAS: &str = "members";

/// Caller plus the membership roles that may perform a mutation.
#[derive(Debug, Clone)]
pub struct MemberAccess {
    pub user: AuthUser,
    pub allowed: Vec<ProjectMemberRole>,
}

impl MemberAccess {
    pub fn new(user: &AuthUser, allowed: &[ProjectMemberRole]) -> Self {
        Self { user: user.clone(), allowed: allowed.to_vec() }
    }
}

/// Identifies the membership row the role check runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipKey {
    pub project_id: Uuid,
    pub username: String,
}

impl MembershipKey {
    pub fn new(project_id: Uuid, username: &str) -> Self {
        Self { project_id, username: username.to_string() }
    }

    fn conditions(&self) -> Conditions {
        membership(self.project_id, &self.username)
    }
}

type MemberCrud = ApiCrud<ProjectMember, MemberAccess, MembershipKey>;

fn membership(project_id: Uuid, username: &str) -> Conditions {
    Conditions::new().with("projectId", project_id.to_string()).with("username", username)
}

fn member_role_check(ctx: &ValidationContext<'_, ProjectMember, MemberAccess>) -> bool {
    if ctx.context.user.is_admin() {
        return true;
    }
    ctx.entity.is_some_and(|member| ctx.context.allowed.contains(&member.role))
}

/// Loads the caller's own membership; callers outside the project are Forbidden.
fn fetch_membership<'a>(crud: &'a MemberCrud, key: &'a MembershipKey) -> BoxFuture<'a, Result<ProjectMember, CrudError>> {
    async move {
        crud.find_one_by_conditions(&key.conditions(), &FindOptions::default()).await.map_err(|err| match err {
            CrudError::NotFound(_) => CrudError::forbidden("Forbidden"),
            other => other,
        })
    }
    .boxed()
}

fn role_patch(role: ProjectMemberRole) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("role".into(), json!(role));
    patch
}

#[derive(Clone)]
pub struct ProjectMemberService {
    crud: MemberCrud,
}

impl ProjectMemberService {
    pub fn new(pool: PgPool) -> Result<Self, CrudError> {
        let options = CrudOptions::new(ALIAS).relation(RelationOption::new("profile", "profile"));
        let hooks = CrudHooks::new(member_role_check).with_fetch(fetch_membership);
        Ok(Self { crud: ApiCrud::new(pool, options)?.with_hooks(hooks) })
    }

    pub fn crud(&self) -> &MemberCrud {
        &self.crud
    }

    /// Members of a project. Pending rows (guests, invitations) are visible to
    /// their own user and to the project's active members.
    pub async fn list(&self, user: &AuthUser, project_id: Uuid, mut params: QueryParams) -> Result<WithMeta<ProjectMember>, CrudError> {
        params.set_filter("projectId", project_id.to_string());
        let active = || ProjectMemberRole::ACTIVE.into_iter().map(|role| role.as_str());
        let viewer_is_active = Predicate::and(vec![
            FieldRef::new("viewer", "projectId").equals(project_id.to_string()),
            FieldRef::new("viewer", "username").equals(user.username.as_str()),
            FieldRef::new("viewer", "role").is_in(active()),
        ]);
        let access = QueryExtension::or_where(Predicate::or(vec![
            FieldRef::new(ALIAS, "role").is_in(active()),
            FieldRef::new(ALIAS, "username").equals(user.username.as_str()),
            Predicate::exists(&PROJECT_MEMBER, "viewer", viewer_is_active),
        ]));
        self.crud.get_many_with_meta(&params, &[access]).await
    }

    /// An owner or member of the project, with its profile.
    pub async fn find_active(&self, project_id: Uuid, username: &str) -> Result<ProjectMember, CrudError> {
        let conditions = membership(project_id, username).with_any("role", ProjectMemberRole::ACTIVE.into_iter().map(|role| role.as_str()));
        let find = FindOptions { relations: Some(vec![RelationOption::new("profile", "profile")]), ..Default::default() };
        self.crud.find_one_by_conditions(&conditions, &find).await
    }

    /// Active members invite others; the invitee must have a profile.
    pub async fn invite(&self, user: &AuthUser, project_id: Uuid, username: &str) -> Result<ProjectMember, CrudError> {
        let record = json!({ "projectId": project_id, "username": username, "role": ProjectMemberRole::Invited });
        let validate = ValidateOptions::with_context(MemberAccess::new(user, &ProjectMemberRole::ACTIVE))
            .trigger(MembershipKey::new(project_id, &user.username))
            .require_role_validation()
            .find_one_before_create(membership(project_id, username));
        let invited = self.crud.create(&record, validate).await?;
        tracing::info!("{} invited {} to project {}", user.username, username, project_id);
        Ok(invited)
    }

    pub async fn request_to_join(&self, user: &AuthUser, project_id: Uuid) -> Result<ProjectMember, CrudError> {
        match self.crud.find_one_by_conditions(&membership(project_id, &user.username), &FindOptions::default()).await {
            Ok(existing) => {
                return Err(CrudError::conflict(format!(
                    "The username {} has already joined in project {} as {}",
                    user.username,
                    project_id,
                    existing.role.as_str()
                )))
            }
            Err(CrudError::NotFound(_)) => {}
            Err(other) => return Err(other),
        }

        let record = json!({ "projectId": project_id, "username": user.username, "role": ProjectMemberRole::GuestMember });
        self.crud.create(&record, ValidateOptions::new()).await
    }

    /// Turns the caller's invitation into a membership.
    pub async fn accept(&self, user: &AuthUser, project_id: Uuid) -> Result<ProjectMember, CrudError> {
        let conditions = membership(project_id, &user.username).with("role", ProjectMemberRole::Invited.as_str());
        self.crud
            .update_one_by_conditions(
                &role_patch(ProjectMemberRole::Member),
                &conditions,
                &FindOptions::default(),
                ValidateOptions::skip_role_validation(),
            )
            .await
    }

    /// Owner admits a guest who asked to join.
    pub async fn approve(&self, user: &AuthUser, project_id: Uuid, username: &str) -> Result<ProjectMember, CrudError> {
        let conditions = membership(project_id, username).with("role", ProjectMemberRole::GuestMember.as_str());
        let validate = ValidateOptions::with_context(MemberAccess::new(user, &[ProjectMemberRole::Owner]))
            .trigger(MembershipKey::new(project_id, &user.username));
        self.crud.update_one_by_conditions(&role_patch(ProjectMemberRole::Member), &conditions, &FindOptions::default(), validate).await
    }

    /// Anyone but the owner may leave; an invited or guest row is withdrawn.
    pub async fn leave(&self, user: &AuthUser, project_id: Uuid) -> Result<(), CrudError> {
        let allowed = [ProjectMemberRole::GuestMember, ProjectMemberRole::Invited, ProjectMemberRole::Member];
        let validate = ValidateOptions::with_context(MemberAccess::new(user, &allowed));
        self.crud
            .delete_one_by_conditions(&membership(project_id, &user.username), &FindOptions::default(), validate, DeleteOptions::default())
            .await
    }

    pub async fn kick(&self, user: &AuthUser, project_id: Uuid, username: &str) -> Result<(), CrudError> {
        let target = username.to_string();
        let validate = ValidateOptions::with_context(MemberAccess::new(user, &[ProjectMemberRole::Owner]))
            .trigger(MembershipKey::new(project_id, &user.username))
            .post(move |owner: Option<&ProjectMember>| match owner {
                Some(owner) if owner.username == target => Err(CrudError::business_rule("You cannot kick yourself out of the project")),
                _ => Ok(()),
            });
        self.crud
            .delete_one_by_conditions(&membership(project_id, username), &FindOptions::default(), validate, DeleteOptions::default())
            .await?;
        tracing::info!("{} removed {} from project {}", user.username, username, project_id);
        Ok(())
    }

    /// Swap roles with an active member in one transaction.
    pub async fn transfer(&self, user: &AuthUser, project_id: Uuid, username: &str) -> Result<Vec<ProjectMember>, CrudError> {
        if username == user.username {
            return Err(CrudError::business_rule("You already own this project"));
        }

        let owner = self.crud.find_one_by_conditions(&membership(project_id, &user.username), &FindOptions::default()).await?;
        self.crud
            .authorize(Some(&owner), ValidateOptions::with_context(MemberAccess::new(user, &[ProjectMemberRole::Owner])))
            .await?;

        let conditions = membership(project_id, username).with("role", ProjectMemberRole::Member.as_str());
        let successor = self.crud.find_one_by_conditions(&conditions, &FindOptions::default()).await?;

        let saved = self
            .crud
            .apply_patches(vec![(owner, role_patch(ProjectMemberRole::Member)), (successor, role_patch(ProjectMemberRole::Owner))])
            .await?;
        tracing::info!("{} transferred project {} to {}", user.username, project_id, username);
        Ok(saved)
    }
}
