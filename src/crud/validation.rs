use futures::future::BoxFuture;

use super::error::CrudError;
use super::ApiCrud;
use crate::database::metadata::Entity;
use crate::database::query_builder::Conditions;

/// What a role check sees: the authoritative entity (if any) and the caller's context.
pub struct ValidationContext<'a, E, C> {
    pub entity: Option<&'a E>,
    pub context: &'a C,
}

/// Pure predicate deciding whether the caller may perform a mutation.
pub type RoleCheck<E, C> = fn(&ValidationContext<'_, E, C>) -> bool;

/// Loads the entity the role check runs against (e.g. the caller's membership row).
pub type FetchForValidation<E, C, T> = for<'a> fn(&'a ApiCrud<E, C, T>, &'a T) -> BoxFuture<'a, Result<E, CrudError>>;

/// Resource-specific validation hooks.
pub struct CrudHooks<E, C, T> {
    pub role_check: RoleCheck<E, C>,
    pub fetch_for_validation: Option<FetchForValidation<E, C, T>>,
}

impl<E, C, T> CrudHooks<E, C, T> {
    pub fn new(role_check: RoleCheck<E, C>) -> Self {
        Self { role_check, fetch_for_validation: None }
    }

    pub fn with_fetch(mut self, fetch: FetchForValidation<E, C, T>) -> Self {
        self.fetch_for_validation = Some(fetch);
        self
    }
}

impl<E, C, T> Default for CrudHooks<E, C, T> {
    fn default() -> Self {
        Self::new(allow_all)
    }
}

impl<E, C, T> Clone for CrudHooks<E, C, T> {
    fn clone(&self) -> Self {
        Self { role_check: self.role_check, fetch_for_validation: self.fetch_for_validation }
    }
}

fn allow_all<E, C>(_: &ValidationContext<'_, E, C>) -> bool {
    true
}

pub type PostValidator<'a, E> = Box<dyn FnOnce(Option<&E>) -> Result<(), CrudError> + Send + 'a>;

/// Per-call validation settings for mutating operations.
pub struct ValidateOptions<'a, E, C, T> {
    /// `Some(false)` skips the pipeline; `create` only validates on `Some(true)`
    pub has_role_validator: Option<bool>,
    pub validator_context: Option<C>,
    pub trigger_context: Option<T>,
    /// Conflict when a row matching these conditions already exists
    pub find_one_before_create: Option<Conditions>,
    pub pre_validator: Option<BoxFuture<'a, Result<(), CrudError>>>,
    pub post_validator: Option<PostValidator<'a, E>>,
}

impl<'a, E, C, T> Default for ValidateOptions<'a, E, C, T> {
    fn default() -> Self {
        Self {
            has_role_validator: None,
            validator_context: None,
            trigger_context: None,
            find_one_before_create: None,
            pre_validator: None,
            post_validator: None,
        }
    }
}

impl<'a, E, C, T> ValidateOptions<'a, E, C, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate against `context`.
    pub fn with_context(context: C) -> Self {
        Self { validator_context: Some(context), ..Self::default() }
    }

    pub fn skip_role_validation() -> Self {
        Self { has_role_validator: Some(false), ..Self::default() }
    }

    pub fn require_role_validation(mut self) -> Self {
        self.has_role_validator = Some(true);
        self
    }

    pub fn trigger(mut self, trigger: T) -> Self {
        self.trigger_context = Some(trigger);
        self
    }

    pub fn find_one_before_create(mut self, conditions: Conditions) -> Self {
        self.find_one_before_create = Some(conditions);
        self
    }

    pub fn pre(mut self, validator: BoxFuture<'a, Result<(), CrudError>>) -> Self {
        self.pre_validator = Some(validator);
        self
    }

    pub fn post(mut self, validator: impl FnOnce(Option<&E>) -> Result<(), CrudError> + Send + 'a) -> Self {
        self.post_validator = Some(Box::new(validator));
        self
    }
}

impl<E, C, T> ApiCrud<E, C, T>
where
    E: Entity,
    C: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Runs `pre -> fetch -> role check -> post`; the first failure aborts.
    pub async fn authorize(&self, current: Option<&E>, options: ValidateOptions<'_, E, C, T>) -> Result<(), CrudError> {
        if options.has_role_validator == Some(false) || !self.options.auto_validate_on_ud {
            return Ok(());
        }

        let ValidateOptions { validator_context, trigger_context, pre_validator, post_validator, .. } = options;

        if let Some(pre) = pre_validator {
            pre.await?;
        }

        let fetched = match (self.hooks.fetch_for_validation, trigger_context.as_ref()) {
            (Some(fetch), Some(trigger)) => Some(fetch(self, trigger).await?),
            _ => None,
        };
        let entity = fetched.as_ref().or(current);

        let context = validator_context.as_ref().ok_or_else(|| {
            CrudError::Configuration(format!("Role validation on {} requires a validator context", self.options.alias))
        })?;
        if !(self.hooks.role_check)(&ValidationContext { entity, context }) {
            tracing::debug!("Role check rejected a mutation on {}", self.options.alias);
            return Err(CrudError::forbidden("Forbidden"));
        }

        if let Some(post) = post_validator {
            post(entity)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crud::error::ErrorKind;
    use crate::crud::CrudOptions;
    use crate::database::metadata::{ColumnDef, EntitySchema, FieldKind};
    use futures::FutureExt;
    use serde::{Deserialize, Serialize};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Seat {
        id: String,
        holder: String,
    }

    static SEAT: EntitySchema = EntitySchema {
        name: "seat",
        table: "seat",
        primary_key: &["id"],
        columns: &[ColumnDef::new("id", "id", FieldKind::Text), ColumnDef::new("holder", "holder", FieldKind::Text)],
        relations: &[],
    };

    impl Entity for Seat {
        fn schema() -> &'static EntitySchema {
            &SEAT
        }
    }

    fn holder_only(ctx: &ValidationContext<'_, Seat, String>) -> bool {
        ctx.entity.is_some_and(|seat| &seat.holder == ctx.context)
    }

    fn fetch_seat<'a>(_: &'a ApiCrud<Seat, String, String>, holder: &'a String) -> BoxFuture<'a, Result<Seat, CrudError>> {
        let seat = Seat { id: "fetched".into(), holder: holder.clone() };
        async move { Ok(seat) }.boxed()
    }

    fn crud(auto_validate: bool) -> ApiCrud<Seat, String, String> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://localhost:1/unused").unwrap();
        let options = CrudOptions::new("seat").auto_validate_on_ud(auto_validate);
        ApiCrud::new(pool, options).unwrap().with_hooks(CrudHooks::new(holder_only).with_fetch(fetch_seat))
    }

    fn seat(holder: &str) -> Seat {
        Seat { id: "s1".into(), holder: holder.into() }
    }

    #[tokio::test]
    async fn role_check_uses_the_current_entity() {
        let crud = crud(true);
        assert!(crud.authorize(Some(&seat("ann")), ValidateOptions::with_context("ann".to_string())).await.is_ok());
        let denied = crud.authorize(Some(&seat("bob")), ValidateOptions::with_context("ann".to_string())).await.unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn fetched_entity_replaces_the_current_one() {
        let crud = crud(true);
        let options = ValidateOptions::with_context("ann".to_string()).trigger("ann".to_string());
        assert!(crud.authorize(Some(&seat("bob")), options).await.is_ok());
    }

    #[tokio::test]
    async fn disabled_validation_is_a_no_op() {
        assert!(crud(false).authorize(Some(&seat("bob")), ValidateOptions::with_context("ann".into())).await.is_ok());
        assert!(crud(true).authorize(None, ValidateOptions::skip_role_validation()).await.is_ok());
    }

    #[tokio::test]
    async fn pre_failure_stops_before_role_check_and_post() {
        let post_calls = Arc::new(AtomicUsize::new(0));
        let counter = post_calls.clone();
        let options = ValidateOptions::with_context("ann".to_string())
            .pre(async { Err(CrudError::bad_request("closed")) }.boxed())
            .post(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let err = crud(true).authorize(Some(&seat("ann")), options).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(post_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn post_runs_after_a_successful_role_check() {
        let options = ValidateOptions::with_context("ann".to_string())
            .post(|entity: Option<&Seat>| match entity {
                Some(seat) if seat.holder == "ann" => Err(CrudError::business_rule("cannot remove yourself")),
                _ => Ok(()),
            });
        let err = crud(true).authorize(Some(&seat("ann")), options).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
    }

    #[tokio::test]
    async fn missing_context_is_a_configuration_error() {
        let err = crud(true).authorize(Some(&seat("ann")), ValidateOptions::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
