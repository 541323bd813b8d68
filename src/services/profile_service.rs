use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::config::CONFIG;
use crate::crud::{ApiCrud, CrudError, CrudOptions, FindOptions, ValidateOptions};
use crate::database::models::profile::position;
use crate::database::models::Profile;
use crate::database::paginated::WithMeta;
use crate::database::query_builder::{Conditions, FieldRef, QueryExtension};
use crate::filter::{FilterValue, QueryParams};

/// Body of `POST /profiles`; the username always comes from the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProfileDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expertises: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_born: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievements: Option<Value>,
}

/// Partial update of the caller's own profile. Absent fields are left alone.
pub type UpdateProfileDto = CreateProfileDto;

#[derive(Debug, Serialize)]
struct NewProfile {
    username: String,
    #[serde(flatten)]
    fields: CreateProfileDto,
}

/// Public shape of a profile: the stored avatar key resolved against the asset host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProfileView(pub Profile);

impl From<Profile> for ProfileView {
    fn from(mut profile: Profile) -> Self {
        profile.avatar = resolve_asset(&profile.avatar);
        ProfileView(profile)
    }
}

fn resolve_asset(key: &str) -> String {
    if key.is_empty() || key.starts_with("http://") || key.starts_with("https://") {
        return key.to_string();
    }
    format!("{}/{}", CONFIG.profile.asset_base_url.trim_end_matches('/'), key.trim_start_matches('/'))
}

#[derive(Clone)]
pub struct ProfileService {
    crud: ApiCrud<Profile>,
}

impl ProfileService {
    pub fn new(pool: PgPool) -> Result<Self, CrudError> {
        let options = CrudOptions::new("profile").auto_validate_on_ud(false);
        Ok(Self { crud: ApiCrud::new(pool, options)? })
    }

    pub fn crud(&self) -> &ApiCrud<Profile> {
        &self.crud
    }

    pub async fn list(&self, params: QueryParams) -> Result<WithMeta<ProfileView>, CrudError> {
        let params = age_to_year_born(params, Utc::now().year());
        Ok(self.crud.get_many_with_meta(&params, &[]).await?.into_view())
    }

    /// Same as [`list`](Self::list) with the caller left out.
    pub async fn list_others(&self, username: &str, params: QueryParams) -> Result<WithMeta<ProfileView>, CrudError> {
        let params = age_to_year_born(params, Utc::now().year());
        let not_me = QueryExtension::and_where(FieldRef::new("profile", "username").not_equals(username));
        Ok(self.crud.get_many_with_meta(&params, &[not_me]).await?.into_view())
    }

    pub async fn find_by_username(&self, username: &str) -> Result<ProfileView, CrudError> {
        let conditions = Conditions::new().with("username", username);
        Ok(self.crud.find_one_by_conditions(&conditions, &FindOptions::default()).await?.into())
    }

    /// One profile per username; a second create is a Conflict.
    pub async fn create(&self, username: &str, dto: CreateProfileDto) -> Result<ProfileView, CrudError> {
        let record = NewProfile { username: username.to_string(), fields: with_defaults(dto) };
        let validate = ValidateOptions::new().find_one_before_create(Conditions::new().with("username", username));
        let profile = self.crud.create(&record, validate).await?;
        tracing::info!("Created profile for {}", username);
        Ok(profile.into())
    }

    pub async fn update_me(&self, username: &str, dto: UpdateProfileDto) -> Result<ProfileView, CrudError> {
        let conditions = Conditions::new().with("username", username);
        let current = self.crud.find_one_by_conditions(&conditions, &FindOptions::default()).await?;
        let mut patch = dto;
        let is_student = patch.position.as_deref().unwrap_or(current.position.as_str()) == position::STUDENT;
        if !is_student {
            patch.student_id = None;
            patch.major = None;
        }
        Ok(self.crud.apply_patch(current, &patch).await?.into())
    }
}

fn with_defaults(mut dto: CreateProfileDto) -> CreateProfileDto {
    let defaults = &CONFIG.profile;
    dto.avatar.get_or_insert_with(|| defaults.default_avatar.clone());
    dto.bio.get_or_insert_with(|| defaults.default_bio.clone());
    let is_student = dto.position.get_or_insert_with(|| position::OTHERS.to_string()).as_str() == position::STUDENT;
    if !is_student {
        dto.student_id = None;
        dto.major = None;
    }
    dto
}

/// `?age=20` becomes `yearBorn=<year - 20>`, merged with any explicit `yearBorn` values.
fn age_to_year_born(mut params: QueryParams, current_year: i32) -> QueryParams {
    let Some(ages) = params.remove_filter("age") else {
        return params;
    };

    let mut years: Vec<String> = params
        .remove_filter("yearBorn")
        .map(|value| value.candidates().into_iter().map(str::to_string).collect())
        .unwrap_or_default();
    for age in ages.candidates() {
        match age.trim().parse::<i32>() {
            Ok(age) => years.push((current_year - age).to_string()),
            Err(_) => tracing::debug!("Ignoring non-numeric age filter {:?}", age),
        }
    }

    if !years.is_empty() {
        params.set_filter("yearBorn", FilterValue::Many(years));
    }
    params
}
