use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    errors::{AppError, INVALID_HYPERLINK},
    extract::Links,
};
use crate::{
    db::models::{Hydroponics, SensorReading, User, SYSTEM_NAME_MAX_LEN, USERNAME_MAX_LEN},
    validation::{
        add_error, number_field, require, text_field, FieldErrors, Patch, NOT_NULL, REQUIRED,
    },
};

// ---------------------------------------------------------------------------
// Representations
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDto {
    pub url: String,
    pub id: i64,
    pub date_joined: DateTime<Utc>,
    pub username: String,
    /// Hyperlinks to every system the user owns.
    pub hydroponics: Vec<String>,
}

impl UserDto {
    pub fn new(user: User, system_ids: &[i64], links: &Links) -> Self {
        Self {
            url: links.user(user.id),
            id: user.id,
            date_joined: user.date_joined,
            username: user.username,
            hydroponics: system_ids.iter().map(|id| links.hydroponics(*id)).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HydroponicsDto {
    pub url: String,
    pub id: i64,
    pub created: DateTime<Utc>,
    pub name: String,
    /// Username of the owner.
    pub owner: String,
    /// Hyperlinks to the ten newest readings, newest first.
    pub sensor_readings: Vec<String>,
}

impl HydroponicsDto {
    pub fn new(system: Hydroponics, reading_ids: &[i64], links: &Links) -> Self {
        Self {
            url: links.hydroponics(system.id),
            id: system.id,
            created: system.created,
            name: system.name,
            owner: system.owner_username,
            sensor_readings: reading_ids.iter().map(|id| links.reading(*id)).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorReadingDto {
    pub url: String,
    pub id: i64,
    pub created: DateTime<Utc>,
    /// Hyperlink to the parent system.
    pub hydroponics: String,
    pub ph: Option<f64>,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    /// Total dissolved solids, ppm.
    pub tds: Option<f64>,
}

impl SensorReadingDto {
    pub fn new(reading: SensorReading, links: &Links) -> Self {
        Self {
            url: links.reading(reading.id),
            id: reading.id,
            created: reading.created,
            hydroponics: links.hydroponics(reading.hydroponics_id),
            ph: reading.ph,
            temperature: reading.temperature,
            tds: reading.tds,
        }
    }
}

/// Directory served at `/`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiRootDto {
    pub users: String,
    pub hydroponics: String,
    pub sensor_readings: String,
    pub admin: String,
    #[serde(rename = "api-schema")]
    pub api_schema: String,
    #[serde(rename = "api-docs")]
    pub api_docs: String,
}

// ---------------------------------------------------------------------------
// Request bodies (documentation shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct HydroponicsRequest {
    /// Defaults to `"Hydroponics"` on create.
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SensorReadingRequest {
    /// Hyperlink (or integer id) of the parent system. Cannot change after
    /// creation.
    pub hydroponics: String,
    pub ph: Option<f64>,
    pub temperature: Option<f64>,
    pub tds: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserRequest {
    pub username: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Send as `Authorization: Token <token>`.
    pub token: Uuid,
    /// Hyperlink to the authenticated user.
    pub user: String,
}

// ---------------------------------------------------------------------------
// Body parsing
// ---------------------------------------------------------------------------

/// An empty body reads as `{}`.
pub fn json_object(body: &Bytes) -> Result<Map<String, Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("JSON parse error - {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AppError::BadRequest(format!(
            "Invalid data. Expected a dictionary, but got {}.",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn finish<T>(value: T, errors: FieldErrors) -> Result<T, AppError> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(AppError::Validation(errors))
    }
}

#[derive(Debug)]
pub struct HydroponicsInput {
    pub name: Patch<String>,
}

impl HydroponicsInput {
    pub fn parse(body: &Bytes) -> Result<Self, AppError> {
        let body = json_object(body)?;
        let mut errors = FieldErrors::new();
        let name = text_field(&body, "name", SYSTEM_NAME_MAX_LEN, &mut errors);
        finish(Self { name }, errors)
    }
}

#[derive(Debug)]
pub struct SensorReadingInput {
    pub hydroponics: Patch<i64>,
    pub ph: Patch<f64>,
    pub temperature: Patch<f64>,
    pub tds: Patch<f64>,
}

impl SensorReadingInput {
    /// `require_parent` is set for create and full update.
    pub fn parse(body: &Bytes, require_parent: bool, links: &Links) -> Result<Self, AppError> {
        let body = json_object(body)?;
        let mut errors = FieldErrors::new();

        let hydroponics = hyperlink_field(&body, "hydroponics", "hydroponics", links, &mut errors);
        if require_parent && !errors.contains_key("hydroponics") {
            require(&hydroponics, "hydroponics", &mut errors);
        }
        let input = Self {
            hydroponics,
            ph: number_field(&body, "ph", &mut errors),
            temperature: number_field(&body, "temperature", &mut errors),
            tds: number_field(&body, "tds", &mut errors),
        };
        finish(input, errors)
    }
}

#[derive(Debug)]
pub struct UserInput {
    pub username: Patch<String>,
}

impl UserInput {
    pub fn parse(body: &Bytes, require_username: bool) -> Result<Self, AppError> {
        let body = json_object(body)?;
        let mut errors = FieldErrors::new();

        let username = match text_field(&body, "username", USERNAME_MAX_LEN, &mut errors) {
            Patch::Value(name) if !is_valid_username(&name) => {
                add_error(
                    &mut errors,
                    "username",
                    "Enter a valid username. This value may contain only letters, \
                     numbers, and @/./+/-/_ characters.",
                );
                Patch::Missing
            }
            other => other,
        };
        if require_username && !errors.contains_key("username") {
            require(&username, "username", &mut errors);
        }
        finish(Self { username }, errors)
    }
}

pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Passwords are taken verbatim, without trimming.
    pub fn parse(body: &Bytes) -> Result<Self, AppError> {
        let body = json_object(body)?;
        let mut errors = FieldErrors::new();

        let mut raw = |field: &str| match body.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Null) => {
                add_error(&mut errors, field, NOT_NULL);
                None
            }
            Some(_) => {
                add_error(&mut errors, field, "Not a valid string.");
                None
            }
            None => {
                add_error(&mut errors, field, REQUIRED);
                None
            }
        };
        let username = raw("username");
        let password = raw("password");

        match (username, password) {
            (Some(username), Some(password)) => Ok(Self {
                username: username.trim().to_owned(),
                password,
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

// ---------------------------------------------------------------------------
// Hyperlinks
// ---------------------------------------------------------------------------

/// Resolves `http://host/<base path>/<collection>/<id>/` (or the bare path)
/// to `id`. The host is not checked and the base path is optional.
pub fn parse_hyperlink(value: &str, base_path: &str, collection: &str) -> Option<i64> {
    let path = match Url::parse(value) {
        Ok(url) => url.path().to_owned(),
        Err(_) if value.starts_with('/') => value.to_owned(),
        Err(_) => return None,
    };
    let path = match path.strip_prefix(base_path) {
        Some(rest) if !base_path.is_empty() && rest.starts_with('/') => rest,
        _ => path.as_str(),
    };

    let mut segments = path.trim_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(c), Some(id), None) if c == collection => id.parse().ok(),
        _ => None,
    }
}

/// Accepts a hyperlink or a bare integer id.
fn hyperlink_field(
    body: &Map<String, Value>,
    field: &str,
    collection: &str,
    links: &Links,
    errors: &mut FieldErrors,
) -> Patch<i64> {
    let id = match body.get(field) {
        None => return Patch::Missing,
        Some(Value::Null) => {
            add_error(errors, field, NOT_NULL);
            return Patch::Null;
        }
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => match parse_hyperlink(s.trim(), links.base_path(), collection) {
                Some(id) => Some(id),
                None => {
                    add_error(errors, field, "Invalid hyperlink - No URL match.");
                    return Patch::Missing;
                }
            },
        },
        Some(other) => {
            add_error(
                errors,
                field,
                format!(
                    "Incorrect type. Expected URL string, received {}.",
                    json_type(other)
                ),
            );
            return Patch::Missing;
        }
    };

    match id {
        Some(id) => Patch::Value(id),
        None => {
            add_error(errors, field, INVALID_HYPERLINK);
            Patch::Missing
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn bytes(v: Value) -> Bytes {
        Bytes::from(v.to_string())
    }

    fn links() -> Links {
        Links::new("http://testserver", "/").unwrap()
    }

    fn field_errors(err: AppError) -> FieldErrors {
        match err {
            AppError::Validation(errors) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn hyperlinks_resolve_by_path() {
        assert_eq!(
            parse_hyperlink("http://testserver/hydroponics/12/", "", "hydroponics"),
            Some(12)
        );
        assert_eq!(parse_hyperlink("/hydroponics/3/", "", "hydroponics"), Some(3));
        assert_eq!(parse_hyperlink("/hydroponics/3", "", "hydroponics"), Some(3));
        assert_eq!(parse_hyperlink("/users/3/", "", "hydroponics"), None);
        assert_eq!(parse_hyperlink("/hydroponics/x/", "", "hydroponics"), None);
        assert_eq!(parse_hyperlink("/hydroponics/3/extra/", "", "hydroponics"), None);
        assert_eq!(parse_hyperlink("hydroponics", "", "hydroponics"), None);
    }

    #[test]
    fn hyperlinks_under_a_base_path() {
        assert_eq!(
            parse_hyperlink("https://grow.example.com/api/hydroponics/2/", "/api", "hydroponics"),
            Some(2)
        );
        assert_eq!(parse_hyperlink("/api/hydroponics/2/", "/api", "hydroponics"), Some(2));
        assert_eq!(parse_hyperlink("/hydroponics/2/", "/api", "hydroponics"), Some(2));
        assert_eq!(parse_hyperlink("/apiary/hydroponics/2/", "/api", "hydroponics"), None);
        assert_eq!(parse_hyperlink("/other/hydroponics/2/", "/api", "hydroponics"), None);
    }

    #[test]
    fn empty_body_is_an_empty_object() {
        assert!(json_object(&Bytes::new()).unwrap().is_empty());
        assert!(matches!(
            json_object(&Bytes::from_static(b"[1]")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            json_object(&Bytes::from_static(b"{oops")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn reading_input_accepts_link_or_id() {
        let input = SensorReadingInput::parse(
            &bytes(json!({ "hydroponics": "http://testserver/hydroponics/4/", "ph": 6.5 })),
            true,
            &links(),
        )
        .unwrap();
        assert_eq!(input.hydroponics, Patch::Value(4));
        assert_eq!(input.ph, Patch::Value(6.5));
        assert_eq!(input.tds, Patch::Missing);

        let input = SensorReadingInput::parse(&bytes(json!({ "hydroponics": 4 })), true, &links())
                .unwrap();
        assert_eq!(input.hydroponics, Patch::Value(4));
    }

    #[test]
    fn reading_input_requires_parent_only_when_asked() {
        let errors = field_errors(
            SensorReadingInput::parse(&bytes(json!({ "ph": 7 })), true, &links()).unwrap_err(),
        );
        assert_eq!(errors["hydroponics"], vec![REQUIRED]);

        let input = SensorReadingInput::parse(&bytes(json!({ "ph": 7 })), false, &links()).unwrap();
        assert!(input.hydroponics.is_missing());
    }

    #[test]
    fn reading_input_collects_every_error() {
        let errors = field_errors(
            SensorReadingInput::parse(
                &bytes(json!({ "hydroponics": "/nowhere/", "ph": "acid", "tds": true })),
                true,
                &links(),
            )
            .unwrap_err(),
        );
        assert_eq!(errors.len(), 3);
        assert_eq!(errors["hydroponics"], vec!["Invalid hyperlink - No URL match."]);

        let errors = field_errors(
            SensorReadingInput::parse(&bytes(json!({ "hydroponics": [1] })), true, &links())
                .unwrap_err(),
        );
        assert_eq!(errors["hydroponics"].len(), 1);
    }

    #[test]
    fn username_rules() {
        assert!(is_valid_username("grower_1.test+x@y-z"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("semi;colon"));

        let errors =
            field_errors(UserInput::parse(&bytes(json!({ "username": "a b" })), false).unwrap_err());
        assert_eq!(errors["username"].len(), 1);

        let errors = field_errors(UserInput::parse(&bytes(json!({})), true).unwrap_err());
        assert_eq!(errors["username"], vec![REQUIRED]);
        assert!(UserInput::parse(&bytes(json!({})), false).is_ok());
    }

    #[test]
    fn credentials_keep_password_verbatim() {
        let creds =
            Credentials::parse(&bytes(json!({ "username": " me ", "password": " secret " }))).unwrap();
        assert_eq!(creds.username, "me");
        assert_eq!(creds.password, " secret ");

        let errors = field_errors(Credentials::parse(&bytes(json!({ "username": "me" }))).unwrap_err());
        assert_eq!(errors["password"], vec![REQUIRED]);
    }

    #[test]
    fn root_uses_dashed_keys() {
        let root = ApiRootDto {
            users: "u".into(),
            hydroponics: "h".into(),
            sensor_readings: "r".into(),
            admin: "a".into(),
            api_schema: "s".into(),
            api_docs: "d".into(),
        };
        let value = serde_json::to_value(root).unwrap();
        assert_eq!(value["api-schema"], "s");
        assert_eq!(value["api-docs"], "d");
    }
}
