mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{expect_status, TestApp};

/// Ten profiles, three of which list `it` or `design` among their expertises.
async fn seed_profiles(app: &TestApp) -> Result<()> {
    let expertises = ["it", "math", "design", "law", "math", "it,design", "law", "math", "law", "math"];
    for (i, expertise) in expertises.iter().enumerate() {
        let username = format!("user{:02}", i);
        let list: Vec<&str> = expertise.split(',').collect();
        app.profile(
            &username,
            json!({ "fullname": format!("Person {}", i), "expertises": list, "year_born": 1990 + i as i32, "achievements": { "medals": i } }),
        )
        .await?;
    }
    Ok(())
}

async fn list(app: &TestApp, query: &str) -> Result<Value> {
    let resp = app.get("user00", &format!("/profiles{}", query)).send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    Ok(body["data"].clone())
}

fn usernames(page: &Value) -> Vec<String> {
    page["data"].as_array().into_iter().flatten().filter_map(|p| p["username"].as_str().map(str::to_string)).collect()
}

#[tokio::test]
async fn filters_sort_and_paginate_together() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    seed_profiles(&app).await?;

    let page = list(&app, "?expertises=it&expertises=design&sort=-createdAt&page=1&limit=2").await?;
    assert_eq!(page["meta"]["totalResult"], 3, "{}", page);
    assert_eq!(page["meta"]["totalPage"], 2);
    assert_eq!(page["meta"]["count"], 2);
    assert_eq!(usernames(&page), vec!["user05", "user02"]);

    let created: Vec<&str> = page["data"].as_array().into_iter().flatten().filter_map(|p| p["created_at"].as_str()).collect();
    assert!(created.windows(2).all(|pair| pair[0] >= pair[1]), "expected descending creation: {:?}", created);

    app.cleanup().await
}

#[tokio::test]
async fn page_window_is_normalized() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    seed_profiles(&app).await?;

    for query in ["?limit=500", "?limit=abc", "?limit=0", ""] {
        let page = list(&app, query).await?;
        assert_eq!(page["meta"]["limit"], 30, "{}", query);
        assert_eq!(page["meta"]["count"], 10);
    }
    let page = list(&app, "?page=0&limit=4").await?;
    assert_eq!(page["meta"]["currentPage"], 1);
    assert_eq!(page["meta"]["totalPage"], 3);

    let last = list(&app, "?page=3&limit=4&sort=createdAt").await?;
    assert_eq!(usernames(&last), vec!["user08", "user09"]);

    app.cleanup().await
}

#[tokio::test]
async fn ignored_filters_match_everything() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    seed_profiles(&app).await?;

    for query in ["?expertises[]=", "?achievements=gold", "?createdAt=2001-01-01", "?nickname=ghost"] {
        let page = list(&app, query).await?;
        assert_eq!(page["meta"]["totalResult"], 10, "{} should not filter", query);
    }

    app.cleanup().await
}

#[tokio::test]
async fn numeric_filters_and_age_conversion() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    seed_profiles(&app).await?;

    let page = list(&app, "?yearBorn=1991&yearBorn=1993").await?;
    assert_eq!(usernames(&page).len(), 2);

    let age = chrono::Datelike::year(&chrono::Utc::now()) - 1994;
    let page = list(&app, &format!("?age={}&yearBorn=1990", age)).await?;
    let mut found = usernames(&page);
    found.sort();
    assert_eq!(found, vec!["user00", "user04"]);

    let resp = app.get("user00", "/profiles?yearBorn=abc").send().await?;
    let body = expect_status(resp, StatusCode::BAD_REQUEST).await?;
    assert_eq!(body["code"], "BAD_REQUEST");

    app.cleanup().await
}

#[tokio::test]
async fn unknown_sort_field_is_rejected() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };

    let resp = app.get("user00", "/profiles?sort=-password").send().await?;
    expect_status(resp, StatusCode::BAD_REQUEST).await?;

    app.cleanup().await
}

#[tokio::test]
async fn full_text_search_and_exclusion_of_the_caller() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    seed_profiles(&app).await?;

    let page = list(&app, "?search=user03").await?;
    assert_eq!(usernames(&page), vec!["user03"]);

    let resp = app.get("user00", "/profiles/others?limit=30").send().await?;
    let body = expect_status(resp, StatusCode::OK).await?;
    let others = usernames(&body["data"]);
    assert_eq!(others.len(), 9);
    assert!(!others.contains(&"user00".to_string()));

    app.cleanup().await
}

#[tokio::test]
async fn requests_without_a_token_are_rejected() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };

    let resp = app.client.get(app.url("/profiles")).send().await?;
    let body = expect_status(resp, StatusCode::UNAUTHORIZED).await?;
    assert_eq!(body["error"], true);

    let resp = app.client.get(app.url("/health")).send().await?;
    expect_status(resp, StatusCode::OK).await?;

    app.cleanup().await
}

#[tokio::test]
async fn huge_page_numbers_return_an_empty_page() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };
    seed_profiles(&app).await?;

    let page = list(&app, "?page=9223372036854775807&limit=30").await?;
    assert_eq!(page["meta"]["count"], 0, "{}", page);
    assert_eq!(page["meta"]["totalResult"], 10);
    assert_eq!(page["meta"]["limit"], 30);

    app.cleanup().await
}

#[tokio::test]
async fn malformed_path_ids_use_the_error_envelope() -> Result<()> {
    let Some(app) = common::spawn_app().await? else { return Ok(()) };

    let resp = app.get("user00", "/projects/not-a-uuid").send().await?;
    let body = expect_status(resp, StatusCode::BAD_REQUEST).await?;
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "BAD_REQUEST");

    let resp = app.get("user00", "/projects/not-a-uuid/members/bob").send().await?;
    let body = expect_status(resp, StatusCode::BAD_REQUEST).await?;
    assert_eq!(body["error"], true);

    app.cleanup().await
}
