//! Exercises the three global middlewares wired in `lib.rs::build`:
//! `SecurityHeadersMiddleware`, `ServerTimeMiddleware`, and
//! `AdminAuthMiddleware`.

use anyhow::Result;

use test_helpers::{spawn_app, spawn_app_with};

#[tokio::test]
async fn security_headers_present_on_ordinary_routes() -> Result<()> {
    let app = spawn_app().await;
    let created = app.create_started_auction("headers", 1).await?;

    let url = format!("{}/auction/{}", app.client.address, created.auction.id);
    let response = app.client.inner_client.get(&url).send().await?;

    let headers = response.headers();
    let cache_control = headers.get("cache-control").expect("cache-control present").to_str()?;
    assert!(cache_control.contains("no-store"));
    assert!(cache_control.contains("no-cache"));
    assert!(cache_control.contains("must-revalidate"));
    assert!(cache_control.contains("private"));
    assert_eq!(headers.get("pragma").expect("pragma present").to_str()?, "no-cache");
    assert_eq!(headers.get("expires").expect("expires present").to_str()?, "0");

    Ok(())
}

#[tokio::test]
async fn health_check_is_exempt_from_security_headers() -> Result<()> {
    let app = spawn_app().await;

    let url = format!("{}/health_check", app.client.address);
    let response = app.client.inner_client.get(&url).send().await?;

    let headers = response.headers();
    assert!(headers.get("cache-control").is_none());
    assert!(headers.get("pragma").is_none());
    assert!(headers.get("expires").is_none());

    Ok(())
}

#[tokio::test]
async fn server_time_header_reflects_the_mock_clock() -> Result<()> {
    let app = spawn_app().await;
    app.advance_time_ms(5_000);

    let url = format!("{}/health_check", app.client.address);
    let response = app.client.inner_client.get(&url).send().await?;

    let header_millis: i64 = response
        .headers()
        .get("x-server-time")
        .expect("x-server-time present")
        .to_str()?
        .parse()?;
    assert_eq!(header_millis, app.time_source.now().as_millisecond());

    Ok(())
}

#[tokio::test]
async fn admin_routes_are_open_when_no_admin_token_is_configured() -> Result<()> {
    let app = spawn_app().await;

    // The default test config leaves `admin_token` unset; admin routes must
    // stay reachable without any `x-admin-token` header.
    let created = app.create_started_auction("open admin", 1).await?;
    let response = app.client.stop_auction(&created.auction.id).await;
    assert!(response.is_ok());

    Ok(())
}

#[tokio::test]
async fn admin_routes_reject_missing_or_wrong_token_once_configured() -> Result<()> {
    let app = spawn_app_with(|config| {
        config.admin_token = Some(secrecy::SecretBox::new(Box::new("s3cret".to_string())));
    })
    .await;

    let url = format!("{}/admin/auction", app.client.address);
    let body = serde_json::json!({"title": "gated", "total_items": 1, "start_now": false});

    let unauthenticated = app.client.inner_client.post(&url).json(&body).send().await?;
    assert_eq!(unauthenticated.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong_token = app
        .client
        .inner_client
        .post(&url)
        .header("x-admin-token", "nope")
        .json(&body)
        .send()
        .await?;
    assert_eq!(wrong_token.status(), reqwest::StatusCode::UNAUTHORIZED);

    let authenticated = app
        .client
        .inner_client
        .post(&url)
        .header("x-admin-token", "s3cret")
        .json(&body)
        .send()
        .await?;
    assert_eq!(authenticated.status(), reqwest::StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn admin_token_does_not_gate_non_admin_routes() -> Result<()> {
    let app = spawn_app_with(|config| {
        config.admin_token = Some(secrecy::SecretBox::new(Box::new("s3cret".to_string())));
    })
    .await;

    let url = format!("{}/health_check", app.client.address);
    let response = app.client.inner_client.get(&url).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    Ok(())
}
