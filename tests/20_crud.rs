mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use collab_api_rust::crud::{ApiCrud, CrudOptions, ErrorKind, FindOptions, RootPagination};
use collab_api_rust::database::models::{Project, ProjectMemberRole};
use collab_api_rust::database::query_builder::{Conditions, RelationOption};
use collab_api_rust::filter::QueryParams;
use collab_api_rust::services::ProjectService;
use common::{expect_status, TestApp};

async fn add_member(app: &TestApp, project_id: &str, username: &str, role: ProjectMemberRole) -> Result<()> {
    app.profile(username, json!({})).await?;
    sqlx::query("INSERT INTO project_member (project_id, username, role) VALUES ($1::uuid, $2, $3)")
        .bind(project_id)
        .bind(username)
        .bind(role.as_str())
        .execute(&app.pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn create_project_cascades_the_owner() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    app.profile("ann", json!({ "fullname": "Ann" })).await?;

    let resp = app.post("ann", "/projects").json(&json!({ "name": "Rover", "major": ["IT"], "expertises": ["rust"] })).send().await?;
    let body = expect_status(resp, StatusCode::CREATED).await?;
    assert_eq!(body["data"]["status"], "OPENING");
    assert_eq!(body["data"]["members"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"]["members"][0]["role"], "OWNER");
    assert_eq!(body["data"]["expertises"], json!(["rust"]));

    let id = body["data"]["id"].as_str().unwrap_or_default().to_string();
    let resp = app.get("ann", &format!("/projects/{}", id)).send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    assert_eq!(body["data"]["members"][0]["profile"]["fullname"], "Ann");

    let resp = app.get("ann", "/projects?major=it").send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    assert_eq!(body["data"]["meta"]["totalResult"], 1);

    app.cleanup().await
}

#[tokio::test]
async fn root_scoped_pages_count_projects_not_rows() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    app.profile("owner", json!({})).await?;
    let crowded = app.project("owner", "crowded").await?;
    app.project("owner", "quiet").await?;
    for name in ["m1", "m2", "m3", "m4"] {
        add_member(&app, &crowded, name, ProjectMemberRole::Member).await?;
    }

    let service = ProjectService::new(app.pool.clone())?;
    let params = QueryParams::new().with_sort("createdAt").with_limit(1);
    let page = service.crud().get_many_by_relations_with_meta(&params, &[], &RootPagination::default()).await?;
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].members.len(), 5);
    assert_eq!(page.meta.total_result, 2);
    assert_eq!(page.meta.total_page, 2);

    // The HTTP listing keeps only the owner and the caller.
    let resp = app.get("m1", "/projects?limit=1&sort=createdAt").send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    let members = body["data"]["data"][0]["members"].as_array().cloned().unwrap_or_default();
    let mut names: Vec<&str> = members.iter().filter_map(|m| m["username"].as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["m1", "owner"]);
    assert_eq!(body["data"]["meta"]["totalResult"], 2);

    app.cleanup().await
}

#[tokio::test]
async fn only_the_owner_updates() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    app.profile("ann", json!({})).await?;
    let id = app.project("ann", "Before").await?;
    add_member(&app, &id, "bob", ProjectMemberRole::Member).await?;

    let resp = app.patch("bob", &format!("/projects/{}", id)).json(&json!({ "name": "Hijacked" })).send().await?;
    let body = expect_status(resp, StatusCode::FORBIDDEN).await?;
    assert_eq!(body["message"], "Forbidden");

    let resp = app.patch("ann", &format!("/projects/{}", id)).json(&json!({ "name": "After", "status": "CLOSED" })).send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    assert_eq!(body["data"]["name"], "After");
    assert_eq!(body["data"]["status"], "CLOSED");
    let updated_at = body["data"]["updated_at"].clone();

    let resp = app.patch("ann", &format!("/projects/{}", id)).json(&json!({})).send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    assert_eq!(body["data"]["updated_at"], updated_at, "an empty patch must not save");

    let resp = app.client.patch(app.url(&format!("/projects/{}", id))).bearer_auth(app.admin_token("root")).json(&json!({ "name": "Admin" })).send().await?;
    expect_status(resp, StatusCode::OK).await?;

    app.cleanup().await
}

#[tokio::test]
async fn soft_deleted_projects_disappear_from_reads() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    app.profile("ann", json!({})).await?;
    let id = app.project("ann", "Short lived").await?;

    let resp = app.delete("ann", &format!("/projects/{}", id)).send().await?;
    expect_status(resp, StatusCode::NO_CONTENT).await?;

    let resp = app.get("ann", &format!("/projects/{}", id)).send().await?;
    expect_status(resp, StatusCode::NOT_FOUND).await?;

    let service = ProjectService::new(app.pool.clone())?;
    let deleted: Project = service.crud().find_one_by_conditions(&Conditions::new().with("id", id.clone()), &FindOptions::with_deleted()).await?;
    assert!(deleted.deleted_at.is_some());

    let err = service.crud().find_one_by_id(id.as_str()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    app.cleanup().await
}

#[tokio::test]
async fn duplicate_profiles_conflict() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    app.profile("ann", json!({ "bio": "first" })).await?;

    let resp = app.post("ann", "/profiles").json(&json!({ "bio": "second" })).send().await?;
    let body = expect_status(resp, StatusCode::CONFLICT).await?;
    assert_eq!(body["code"], "CONFLICT");

    let resp = app.get("ann", "/profiles/ann").send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    assert_eq!(body["data"]["bio"], "first");

    app.cleanup().await
}

#[tokio::test]
async fn profile_defaults_and_partial_update() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    let body = app.profile("ann", json!({ "student_id": "S-1" })).await?;
    assert_eq!(body["data"]["position"], "OTHERS");
    assert!(body["data"]["student_id"].is_null());
    assert!(body["data"]["avatar"].as_str().unwrap_or_default().ends_with("avatars/default.png"));

    let resp = app.patch("ann", "/profiles/me").json(&json!({ "position": "STUDENT", "student_id": "S-2", "gender": "F" })).send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    assert_eq!(body["data"]["student_id"], "S-2");
    assert_eq!(body["data"]["gender"], "F");
    assert_eq!(body["data"]["username"], "ann");

    let resp = app.patch("nobody", "/profiles/me").json(&json!({ "gender": "M" })).send().await?;
    expect_status(resp, StatusCode::NOT_FOUND).await?;

    app.cleanup().await
}

#[tokio::test]
async fn unknown_relations_are_configuration_errors() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };

    let options = CrudOptions::new("project").relation(RelationOption::new("sponsors", "sponsors"));
    let err = ApiCrud::<Project>::new(app.pool.clone(), options).err().map(|e| e.kind());
    assert_eq!(err, Some(ErrorKind::Configuration));

    app.cleanup().await
}
