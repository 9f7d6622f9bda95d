use axum::{Router, http};
use http::header::{CONTENT_TYPE, HeaderName};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::adapters::http::{
    app_state::AppState,
    extractors::{USER_EMAIL_HEADER, USER_ID_HEADER},
    middleware::ADMIN_TOKEN_HEADER,
    routes,
};

pub fn create_app(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(app_state.config.cors_origin.clone())
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_EMAIL_HEADER),
            HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ]);

    Router::new()
        .nest("/api", routes::router(app_state.clone()))
        .with_state(app_state)
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &http::Request<_>| {
                let request_id = Uuid::new_v4();
                tracing::info_span!(
                    "http-request",
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    request_id = %request_id
                )
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;

    use crate::test_utils::TestAppStateBuilder;

    #[tokio::test]
    async fn routes_are_mounted_under_api_with_security_headers() {
        let (app_state, _billing) = TestAppStateBuilder::new().build().await;
        let server = TestServer::new(create_app(app_state)).unwrap();

        let response = server.get("/api/plans").await;

        response.assert_status(StatusCode::OK);
        assert_eq!(response.header("x-content-type-options"), "nosniff");
        assert_eq!(response.header("x-frame-options"), "DENY");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let (app_state, _billing) = TestAppStateBuilder::new().build().await;
        let server = TestServer::new(create_app(app_state)).unwrap();

        server
            .get("/plans")
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
