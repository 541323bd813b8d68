use convert_case::{Case, Casing};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use std::fmt;
use std::sync::Arc;

use crate::database::metadata::{is_valid_identifier, EntityMetadata, EntitySchema};
use crate::filter::filter_order::FilterOrder;
use crate::filter::filter_where::{FilterWhere, Scope};
use crate::filter::types::{qualified, quote_ident, Pagination, SqlParam, SqlResult};
use crate::filter::{FilterError, QueryParams};

/// `alias.field` reference used by predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub alias: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(alias: impl Into<String>, field: impl Into<String>) -> Self {
        Self { alias: alias.into(), field: field.into() }
    }

    pub fn equals(self, value: impl Into<Value>) -> Predicate {
        Predicate::Eq(self, value.into())
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Predicate {
        Predicate::Ne(self, value.into())
    }

    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In(self, values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self)
    }
}

/// Closed set of boolean conditions services can layer onto a query.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(FieldRef, Value),
    Ne(FieldRef, Value),
    In(FieldRef, Vec<Value>),
    IsNull(FieldRef),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// Correlated `EXISTS` over another entity; outer aliases stay visible inside.
    Exists { schema: &'static EntitySchema, alias: String, predicate: Box<Predicate> },
}

impl Predicate {
    pub fn and(items: Vec<Predicate>) -> Self {
        Predicate::And(items)
    }

    pub fn or(items: Vec<Predicate>) -> Self {
        Predicate::Or(items)
    }

    pub fn exists(schema: &'static EntitySchema, alias: impl Into<String>, predicate: Predicate) -> Self {
        Predicate::Exists { schema, alias: alias.into(), predicate: Box::new(predicate) }
    }
}

/// Caller-supplied query fragments, applied after the configured relation joins.
#[derive(Debug, Clone)]
pub enum QueryExtension {
    /// Join `parentAlias.property` under `alias`, dropping rows without a match
    InnerJoin { path: String, alias: String },
    LeftJoin { path: String, alias: String },
    AndWhere(Predicate),
    /// ORed with everything added by earlier `AndWhere`/`OrWhere` fragments
    OrWhere(Predicate),
}

impl QueryExtension {
    pub fn inner_join(path: impl Into<String>, alias: impl Into<String>) -> Self {
        QueryExtension::InnerJoin { path: path.into(), alias: alias.into() }
    }

    pub fn left_join(path: impl Into<String>, alias: impl Into<String>) -> Self {
        QueryExtension::LeftJoin { path: path.into(), alias: alias.into() }
    }

    pub fn and_where(predicate: Predicate) -> Self {
        QueryExtension::AndWhere(predicate)
    }

    pub fn or_where(predicate: Predicate) -> Self {
        QueryExtension::OrWhere(predicate)
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    In(Vec<Value>),
}

/// Equality lookup on root fields, e.g. `{ projectId, username }`.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    terms: Vec<(String, Condition)>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), Condition::Eq(value.into())));
        self
    }

    pub fn with_any<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.terms.push((field.into(), Condition::In(values.into_iter().map(Into::into).collect())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn to_predicate(&self, alias: &str) -> Predicate {
        Predicate::And(
            self.terms
                .iter()
                .map(|(field, condition)| {
                    let field = FieldRef::new(alias, field.clone());
                    match condition {
                        Condition::Eq(value) => field.equals(value.clone()),
                        Condition::In(values) => field.is_in(values.clone()),
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .terms
            .iter()
            .map(|(field, condition)| match condition {
                Condition::Eq(value) => format!("{}: {}", field, display_value(value)),
                Condition::In(values) => {
                    let values: Vec<String> = values.iter().map(display_value).collect();
                    format!("{}: [{}]", field, values.join(", "))
                }
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Relation to join under `alias`; `nested` children are joined one level deeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationOption {
    pub property: String,
    pub alias: String,
    pub nested: Vec<RelationOption>,
}

impl RelationOption {
    pub fn new(property: impl Into<String>, alias: impl Into<String>) -> Self {
        Self { property: property.into(), alias: alias.into(), nested: vec![] }
    }

    pub fn nested(mut self, child: RelationOption) -> Self {
        self.nested.push(child);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageMode {
    /// LIMIT/OFFSET over joined rows
    #[default]
    Flat,
    /// Paginate root rows in a subquery, then join relations onto the page
    RootScoped {
        /// Apply LIMIT/OFFSET on the outer joined query instead of the subquery
        native_offset: bool,
        /// Count distinct roots across joins and extension predicates
        count_with_extensions: bool,
    },
    /// Single lookup; no page window and no count
    Unpaged,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub mode: PageMode,
    /// Relation aliases to leave out, together with their children
    pub exclude: Vec<String>,
    /// Extra root predicate, used by `find_one_by_*`
    pub conditions: Option<Predicate>,
    pub with_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Left,
    Inner,
}

#[derive(Debug, Clone)]
pub struct JoinNode {
    pub alias: String,
    pub parent: Option<usize>,
    /// Key under which the node is nested in its parent's JSON
    pub key: String,
    pub many: bool,
    pub metadata: Arc<EntityMetadata>,
    join: Option<(JoinKind, String)>,
}

/// Root plus every joined alias, in join order.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub nodes: Vec<JoinNode>,
}

impl JoinPlan {
    fn root(alias: &str, metadata: Arc<EntityMetadata>) -> Self {
        Self {
            nodes: vec![JoinNode { alias: alias.to_string(), parent: None, key: String::new(), many: false, metadata, join: None }],
        }
    }

    pub fn index_of(&self, alias: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.alias == alias)
    }

    fn join_path(&mut self, path: &str, alias: &str, kind: JoinKind, with_deleted: bool) -> Result<(), FilterError> {
        let (parent, property) = path.split_once('.').ok_or_else(|| FilterError::UnknownRelation(path.to_string()))?;
        self.join(parent, property, alias, kind, with_deleted)
    }

    fn join(&mut self, parent_alias: &str, property: &str, alias: &str, kind: JoinKind, with_deleted: bool) -> Result<(), FilterError> {
        if !is_valid_identifier(alias) {
            return Err(FilterError::InvalidIdentifier(alias.to_string()));
        }
        if self.index_of(alias).is_some() {
            return Err(FilterError::InvalidIdentifier(format!("duplicate alias {}", alias)));
        }
        let parent = self.index_of(parent_alias).ok_or_else(|| FilterError::UnknownAlias(parent_alias.to_string()))?;
        let relation = self.nodes[parent]
            .metadata
            .relation(property)
            .ok_or_else(|| FilterError::UnknownRelation(format!("{}.{}", parent_alias, property)))?;
        let metadata = EntityMetadata::for_schema((relation.target)()).map_err(|e| FilterError::UnknownRelation(e.to_string()))?;

        let mut on = format!("{} = {}", qualified(alias, relation.foreign_column), qualified(parent_alias, relation.local_column));
        if !with_deleted {
            if let Some(live) = FilterWhere::not_deleted(alias, &metadata) {
                on = format!("{} AND {}", on, live);
            }
        }

        self.nodes.push(JoinNode {
            alias: alias.to_string(),
            parent: Some(parent),
            key: relation.property.to_case(Case::Snake),
            many: relation.kind.is_many(),
            metadata,
            join: Some((kind, on)),
        });
        Ok(())
    }

    pub fn scope(&self) -> Scope {
        self.nodes.iter().fold(Scope::new(), |scope, node| scope.with(node.alias.clone(), node.metadata.clone()))
    }

    fn select_list(&self) -> String {
        self.nodes
            .iter()
            .map(|node| format!("to_jsonb({0}) AS {0}", quote_ident(&node.alias)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_joins(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|node| {
                let (kind, on) = node.join.as_ref()?;
                let keyword = match kind {
                    JoinKind::Left => "LEFT JOIN",
                    JoinKind::Inner => "INNER JOIN",
                };
                Some(format!(" {} {} AS {} ON {}", keyword, quote_ident(node.metadata.schema.table), quote_ident(&node.alias), on))
            })
            .collect()
    }
}

/// Executable statements for one read: joined rows plus the optional total count.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub rows: SqlResult,
    pub count: Option<SqlResult>,
    pub plan: JoinPlan,
    pub pagination: Pagination,
}

struct SearchTarget<'p> {
    alias: String,
    column: &'static str,
    phrase: &'p str,
    on_root: bool,
}

/// Turns a [`QueryParams`] plus relation configuration into SQL.
pub struct QueryBuilder<'a> {
    metadata: &'a Arc<EntityMetadata>,
    alias: &'a str,
    relations: &'a [RelationOption],
    reserved_fields: &'a [String],
    search_on_relation: Option<&'a str>,
    unaccent: bool,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(metadata: &'a Arc<EntityMetadata>, alias: &'a str) -> Self {
        Self { metadata, alias, relations: &[], reserved_fields: &[], search_on_relation: None, unaccent: false }
    }

    pub fn relations(mut self, relations: &'a [RelationOption]) -> Self {
        self.relations = relations;
        self
    }

    pub fn reserved_fields(mut self, fields: &'a [String]) -> Self {
        self.reserved_fields = fields;
        self
    }

    pub fn search_on_relation(mut self, alias: Option<&'a str>) -> Self {
        self.search_on_relation = alias;
        self
    }

    pub fn unaccent(mut self, enabled: bool) -> Self {
        self.unaccent = enabled;
        self
    }

    pub fn build(&self, params: &QueryParams, extensions: &[QueryExtension], options: &BuildOptions) -> Result<BuiltQuery, FilterError> {
        if !is_valid_identifier(self.alias) {
            return Err(FilterError::InvalidIdentifier(self.alias.to_string()));
        }

        let plan = self.join_plan(extensions, options)?;
        let search = self.search_target(&plan, params);

        let rows = match options.mode {
            PageMode::RootScoped { native_offset, .. } => self.root_scoped_rows(params, extensions, options, &plan, search.as_ref(), native_offset)?,
            PageMode::Flat | PageMode::Unpaged => self.flat_rows(params, extensions, options, &plan, search.as_ref())?,
        };

        let count = match options.mode {
            PageMode::Unpaged => None,
            PageMode::Flat => Some(self.joined_count(params, extensions, options, &plan, search.as_ref())?),
            PageMode::RootScoped { count_with_extensions, .. } => {
                let relation_search = search.as_ref().is_some_and(|target| !target.on_root);
                if count_with_extensions || relation_search {
                    Some(self.joined_count(params, extensions, options, &plan, search.as_ref())?)
                } else {
                    Some(self.root_count(params, options, search.as_ref())?)
                }
            }
        };

        Ok(BuiltQuery { rows, count, plan, pagination: params.pagination() })
    }

    fn join_plan(&self, extensions: &[QueryExtension], options: &BuildOptions) -> Result<JoinPlan, FilterError> {
        let mut plan = JoinPlan::root(self.alias, self.metadata.clone());
        for relation in self.relations {
            if options.exclude.contains(&relation.alias) {
                continue;
            }
            plan.join(self.alias, &relation.property, &relation.alias, JoinKind::Left, options.with_deleted)?;
            for child in &relation.nested {
                if options.exclude.contains(&child.alias) {
                    continue;
                }
                plan.join(&relation.alias, &child.property, &child.alias, JoinKind::Left, options.with_deleted)?;
            }
        }
        for extension in extensions {
            match extension {
                QueryExtension::InnerJoin { path, alias } => plan.join_path(path, alias, JoinKind::Inner, options.with_deleted)?,
                QueryExtension::LeftJoin { path, alias } => plan.join_path(path, alias, JoinKind::Left, options.with_deleted)?,
                QueryExtension::AndWhere(_) | QueryExtension::OrWhere(_) => {}
            }
        }
        Ok(plan)
    }

    fn search_target<'p>(&self, plan: &JoinPlan, params: &'p QueryParams) -> Option<SearchTarget<'p>> {
        let phrase = params.search()?;
        match self.search_on_relation {
            Some(alias) => {
                let node = &plan.nodes[plan.index_of(alias)?];
                let column = node.metadata.search_column()?;
                Some(SearchTarget { alias: node.alias.clone(), column, phrase, on_root: node.parent.is_none() })
            }
            None => {
                let column = self.metadata.search_column()?;
                Some(SearchTarget { alias: self.alias.to_string(), column, phrase, on_root: true })
            }
        }
    }

    fn tsquery(&self, fw: &mut FilterWhere, phrase: &str) -> String {
        let placeholder = fw.param(SqlParam::Text(phrase.to_string()));
        if self.unaccent {
            format!("plainto_tsquery(unaccent({}))", placeholder)
        } else {
            format!("plainto_tsquery({})", placeholder)
        }
    }

    fn is_reserved(&self, property: &str, column: &str) -> bool {
        self.reserved_fields.iter().any(|reserved| reserved == property || reserved == column)
    }

    fn filter_clauses(&self, fw: &mut FilterWhere, alias: &str, params: &QueryParams) -> Result<Vec<String>, FilterError> {
        let mut clauses = vec![];
        for (key, value) in params.filters() {
            let Some(field) = self.metadata.field(key) else {
                tracing::debug!("Skipping filter on unknown field {}.{}", self.metadata.schema.name, key);
                continue;
            };
            if self.is_reserved(field.property, field.column) {
                continue;
            }
            if let Some(sql) = fw.filter_term(alias, field, value)? {
                clauses.push(sql);
            }
        }
        Ok(clauses)
    }

    fn extension_clause(&self, fw: &mut FilterWhere, scope: &Scope, extensions: &[QueryExtension]) -> Result<Option<String>, FilterError> {
        let mut combined: Option<String> = None;
        for extension in extensions {
            let (sql, joiner) = match extension {
                QueryExtension::AndWhere(predicate) => (fw.predicate(scope, predicate)?, "AND"),
                QueryExtension::OrWhere(predicate) => (fw.predicate(scope, predicate)?, "OR"),
                QueryExtension::InnerJoin { .. } | QueryExtension::LeftJoin { .. } => continue,
            };
            combined = Some(match combined {
                None => format!("({})", sql),
                Some(previous) => format!("({} {} ({}))", previous, joiner, sql),
            });
        }
        Ok(combined)
    }

    fn pk_expression(&self, alias: &str) -> String {
        let columns: Vec<String> = self.metadata.primary_key().iter().map(|c| qualified(alias, c)).collect();
        if columns.len() == 1 {
            columns.join("")
        } else {
            format!("({})", columns.join(", "))
        }
    }

    fn flat_rows(
        &self,
        params: &QueryParams,
        extensions: &[QueryExtension],
        options: &BuildOptions,
        plan: &JoinPlan,
        search: Option<&SearchTarget<'_>>,
    ) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let scope = plan.scope();
        let mut wheres = vec![];
        if !options.with_deleted {
            wheres.extend(FilterWhere::not_deleted(self.alias, self.metadata));
        }
        wheres.extend(self.extension_clause(&mut fw, &scope, extensions)?);
        if let Some(conditions) = &options.conditions {
            wheres.push(format!("({})", fw.predicate(&scope, conditions)?));
        }
        wheres.extend(self.filter_clauses(&mut fw, self.alias, params)?);

        let mut order = vec![FilterOrder::generate(self.alias, self.metadata, params.sort())?];
        if let Some(target) = search {
            let column = qualified(&target.alias, target.column);
            let tsquery = self.tsquery(&mut fw, target.phrase);
            wheres.push(format!("{} @@ {}", column, tsquery));
            order.push(format!("ts_rank({}, {}) DESC", column, tsquery));
        }

        let mut query = format!(
            "SELECT {} FROM {} AS {}{}",
            plan.select_list(),
            quote_ident(self.metadata.schema.table),
            quote_ident(self.alias),
            plan.render_joins()
        );
        query.push_str(&where_sql(&wheres));
        query.push_str(&format!(" ORDER BY {}", order.join(", ")));
        if options.mode == PageMode::Flat {
            query.push_str(&limit_sql(params.pagination()));
        }

        Ok(SqlResult { query, params: fw.into_params() })
    }

    fn root_scoped_rows(
        &self,
        params: &QueryParams,
        extensions: &[QueryExtension],
        options: &BuildOptions,
        plan: &JoinPlan,
        search: Option<&SearchTarget<'_>>,
        native_offset: bool,
    ) -> Result<SqlResult, FilterError> {
        let sub = format!("sub{}", self.alias);
        let mut fw = FilterWhere::new();

        let mut inner_where = vec![];
        if !options.with_deleted {
            inner_where.extend(FilterWhere::not_deleted(&sub, self.metadata));
        }
        inner_where.extend(self.filter_clauses(&mut fw, &sub, params)?);
        let mut inner_order = vec![FilterOrder::generate(&sub, self.metadata, params.sort())?];
        let mut outer_order = vec![FilterOrder::generate(self.alias, self.metadata, params.sort())?];

        let mut outer_where = vec![];
        if let Some(target) = search {
            let tsquery = self.tsquery(&mut fw, target.phrase);
            if target.on_root {
                let inner_column = qualified(&sub, target.column);
                inner_where.push(format!("{} @@ {}", inner_column, tsquery));
                inner_order.push(format!("ts_rank({}, {}) DESC", inner_column, tsquery));
                outer_order.push(format!("ts_rank({}, {}) DESC", qualified(self.alias, target.column), tsquery));
            } else {
                let column = qualified(&target.alias, target.column);
                outer_where.push(format!("{} @@ {}", column, tsquery));
                outer_order.push(format!("ts_rank({}, {}) DESC", column, tsquery));
            }
        }

        let mut inner = format!("SELECT {0}.* FROM {1} AS {0}", quote_ident(&sub), quote_ident(self.metadata.schema.table));
        inner.push_str(&where_sql(&inner_where));
        inner.push_str(&format!(" ORDER BY {}", inner_order.join(", ")));
        if !native_offset {
            inner.push_str(&limit_sql(params.pagination()));
        }

        let scope = plan.scope();
        if let Some(clause) = self.extension_clause(&mut fw, &scope, extensions)? {
            outer_where.insert(0, clause);
        }
        if let Some(conditions) = &options.conditions {
            outer_where.push(format!("({})", fw.predicate(&scope, conditions)?));
        }

        let mut query = format!("SELECT {} FROM ({}) AS {}{}", plan.select_list(), inner, quote_ident(self.alias), plan.render_joins());
        query.push_str(&where_sql(&outer_where));
        query.push_str(&format!(" ORDER BY {}", outer_order.join(", ")));
        if native_offset {
            query.push_str(&limit_sql(params.pagination()));
        }

        Ok(SqlResult { query, params: fw.into_params() })
    }

    /// Root rows only; relations and extensions do not affect the total.
    fn root_count(&self, params: &QueryParams, options: &BuildOptions, search: Option<&SearchTarget<'_>>) -> Result<SqlResult, FilterError> {
        let sub = format!("sub{}", self.alias);
        let mut fw = FilterWhere::new();
        let mut wheres = vec![];
        if !options.with_deleted {
            wheres.extend(FilterWhere::not_deleted(&sub, self.metadata));
        }
        wheres.extend(self.filter_clauses(&mut fw, &sub, params)?);
        if let Some(target) = search.filter(|target| target.on_root) {
            let tsquery = self.tsquery(&mut fw, target.phrase);
            wheres.push(format!("{} @@ {}", qualified(&sub, target.column), tsquery));
        }

        let mut query = format!("SELECT COUNT(*) AS \"count\" FROM {} AS {}", quote_ident(self.metadata.schema.table), quote_ident(&sub));
        query.push_str(&where_sql(&wheres));
        Ok(SqlResult { query, params: fw.into_params() })
    }

    /// Distinct roots across every join and extension predicate.
    fn joined_count(
        &self,
        params: &QueryParams,
        extensions: &[QueryExtension],
        options: &BuildOptions,
        plan: &JoinPlan,
        search: Option<&SearchTarget<'_>>,
    ) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let scope = plan.scope();
        let mut wheres = vec![];
        if !options.with_deleted {
            wheres.extend(FilterWhere::not_deleted(self.alias, self.metadata));
        }
        wheres.extend(self.extension_clause(&mut fw, &scope, extensions)?);
        if let Some(conditions) = &options.conditions {
            wheres.push(format!("({})", fw.predicate(&scope, conditions)?));
        }
        wheres.extend(self.filter_clauses(&mut fw, self.alias, params)?);
        if let Some(target) = search {
            let tsquery = self.tsquery(&mut fw, target.phrase);
            wheres.push(format!("{} @@ {}", qualified(&target.alias, target.column), tsquery));
        }

        let mut query = format!(
            "SELECT COUNT(DISTINCT {}) AS \"count\" FROM {} AS {}{}",
            self.pk_expression(self.alias),
            quote_ident(self.metadata.schema.table),
            quote_ident(self.alias),
            plan.render_joins()
        );
        query.push_str(&where_sql(&wheres));
        Ok(SqlResult { query, params: fw.into_params() })
    }
}

fn where_sql(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn limit_sql(pagination: Pagination) -> String {
    format!(" LIMIT {} OFFSET {}", pagination.limit, pagination.offset())
}

pub(crate) fn bind_param_query<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    param: &SqlParam,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match param {
        SqlParam::Null => q.bind(None::<String>),
        SqlParam::Int(i) => q.bind(*i),
        SqlParam::Float(f) => q.bind(*f),
        SqlParam::Text(s) => q.bind(s.clone()),
        SqlParam::Uuid(id) => q.bind(*id),
        SqlParam::Json(value) => q.bind(sqlx::types::Json(value.clone())),
        SqlParam::TextArray(values) => q.bind(values.clone()),
    }
}
