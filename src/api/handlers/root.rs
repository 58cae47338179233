use axum::{extract::State, response::Html, Json};

use crate::api::{dto::ApiRootDto, errors::AppError, extract::Links, AppState};

/// Directory of the top-level resources.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Links to the API entry points", body = ApiRootDto),
    ),
    tag = "system"
)]
pub async fn api_root(
    State(state): State<AppState>,
    links: Links,
) -> Result<Json<ApiRootDto>, AppError> {
    Ok(Json(ApiRootDto {
        users: links.users(),
        hydroponics: links.hydroponics_list(),
        sensor_readings: links.readings(),
        admin: links.absolute(&state.settings.admin_url),
        api_schema: links.absolute("/api-schema/"),
        api_docs: links.absolute("/api-docs/"),
    }))
}

const DOCS_PAGE: &str = r##"<!DOCTYPE html>
<html>
  <head>
    <title>Hydroponics API</title>
    <meta charset="utf-8"/>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
  </head>
  <body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
      window.ui = SwaggerUIBundle({ url: "/api-schema/", dom_id: "#swagger-ui" });
    </script>
  </body>
</html>
"##;

/// Swagger UI over `/api-schema/`.
pub async fn api_docs() -> Html<&'static str> {
    Html(DOCS_PAGE)
}

#[cfg(test)]
mod tests {
    use axum::http::{header, StatusCode};
    use serde_json::Value;

    use super::super::testing::{server, server_with, settings};
    use crate::api::Settings;

    #[tokio::test]
    async fn root_lists_absolute_links() {
        let (server, _) = server();
        let resp = server.get("/").await;
        resp.assert_status_ok();

        let body: Value = resp.json();
        assert_eq!(body["users"], "http://testserver/users/");
        assert_eq!(body["hydroponics"], "http://testserver/hydroponics/");
        assert_eq!(body["sensor_readings"], "http://testserver/sensor_readings/");
        assert_eq!(body["admin"], "http://testserver/admin/");
        assert_eq!(body["api-schema"], "http://testserver/api-schema/");
        assert_eq!(body["api-docs"], "http://testserver/api-docs/");
    }

    #[tokio::test]
    async fn links_follow_an_allowed_host_header() {
        let (server, _) = server_with(Settings {
            public_base_url: None,
            allowed_hosts: vec![".grow.example".to_owned()],
            ..settings()
        });

        let resp = server
            .get("/")
            .add_header(header::HOST, "api.grow.example:8080")
            .add_header("x-forwarded-proto", "https")
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["users"], "https://api.grow.example:8080/users/");

        let resp = server
            .get("/hydroponics/")
            .add_header(header::HOST, "attacker.example")
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = resp.json();
        assert_eq!(body["error"], "Invalid host header.");
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (server, _) = server();
        let resp = server.get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn openapi_schema_is_served() {
        let (server, _) = server();
        let resp = server.get("/api-schema/").await;
        resp.assert_status_ok();

        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "Hydroponics API");
        assert!(body["paths"]["/hydroponics/{id}/"].is_object());
        assert!(body["paths"]["/api-auth/login/"].is_object());
    }

    #[tokio::test]
    async fn docs_page_points_at_schema() {
        let (server, _) = server();
        let resp = server.get("/api-docs/").await;
        resp.assert_status_ok();
        let page = resp.text();
        assert!(page.contains(r#"url: "/api-schema/""#));
        assert!(page.contains(r##"dom_id: "#swagger-ui""##));
        assert!(page.trim_end().ends_with("</html>"));
    }
}
