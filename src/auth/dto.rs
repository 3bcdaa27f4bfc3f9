use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiError;
use crate::media::UploadedFile;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Raw registration form as collected from the multipart body. Field slots
/// are optional here; `validate` enforces the required/optional contract.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<UploadedFile>,
    pub cover_image: Option<UploadedFile>,
}

/// Registration input that passed validation. Username is already
/// lowercased, the form it is stored and matched in.
#[derive(Debug)]
pub struct ValidRegistration {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: UploadedFile,
    pub cover_image: Option<UploadedFile>,
}

fn required_text(value: Option<String>, message: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(message)),
    }
}

impl RegisterForm {
    /// Checks run in a fixed order and the first failure wins.
    pub fn validate(self) -> Result<ValidRegistration, ApiError> {
        let full_name = required_text(self.full_name, "Full name is required")?;
        let email = required_text(self.email, "Email is required")?;
        let username = required_text(self.username, "Username is required")?;
        let password = required_text(self.password, "Password is required")?;
        let avatar = self
            .avatar
            .ok_or_else(|| ApiError::bad_request("Avatar file is required"))?;

        if !is_valid_email(&email) {
            return Err(ApiError::bad_request("Invalid email"));
        }

        Ok(ValidRegistration {
            full_name,
            email,
            username: username.to_lowercase(),
            password,
            avatar,
            cover_image: self.cover_image,
        })
    }
}

/// Login request body. Either identifier may be omitted, but not both.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug)]
pub struct LoginCredentials {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(self) -> Result<LoginCredentials, ApiError> {
        let username = self.username.filter(|v| !v.trim().is_empty());
        let email = self.email.filter(|v| !v.trim().is_empty());
        if username.is_none() && email.is_none() {
            return Err(ApiError::bad_request("Username or email is required"));
        }
        let password = required_text(self.password, "Password is required")?;
        Ok(LoginCredentials {
            username: username.map(|u| u.to_lowercase()),
            email,
            password,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Sanitized user projection returned to callers. The password hash and the
/// stored refresh token never pass through this type.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod validation_tests {
    use super::*;
    use axum::http::StatusCode;
    use bytes::Bytes;

    fn file(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: Some(name.to_string()),
            content_type: "image/png".into(),
            bytes: Bytes::from_static(b"\x89PNG"),
        }
    }

    fn full_form() -> RegisterForm {
        RegisterForm {
            full_name: Some("Alice A".into()),
            email: Some("a@x.com".into()),
            username: Some("Alice".into()),
            password: Some("pw1".into()),
            avatar: Some(file("avatar.png")),
            cover_image: None,
        }
    }

    #[test]
    fn register_checks_fail_in_declared_order() {
        let cases: [(fn(&mut RegisterForm), &str); 5] = [
            (|f| f.full_name = None, "Full name is required"),
            (|f| f.email = Some("".into()), "Email is required"),
            (|f| f.username = None, "Username is required"),
            (|f| f.password = Some("  ".into()), "Password is required"),
            (|f| f.avatar = None, "Avatar file is required"),
        ];
        for (strip, expected) in cases {
            let mut form = full_form();
            strip(&mut form);
            let err = form.validate().unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn first_missing_field_wins_when_several_are_empty() {
        let mut form = full_form();
        form.full_name = Some(String::new());
        form.password = None;
        form.avatar = None;
        let err = form.validate().unwrap_err();
        assert_eq!(err.to_string(), "Full name is required");
    }

    #[test]
    fn register_lowercases_username() {
        let valid = full_form().validate().unwrap();
        assert_eq!(valid.username, "alice");
        assert_eq!(valid.email, "a@x.com");
    }

    #[test]
    fn register_rejects_malformed_email() {
        let mut form = full_form();
        form.email = Some("not-an-email".into());
        let err = form.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid email");
    }

    #[test]
    fn login_accepts_a_single_identifier() {
        let req = LoginRequest {
            email: None,
            username: Some("Alice".into()),
            password: Some("pw1".into()),
        };
        let creds = req.validate().unwrap();
        assert_eq!(creds.username.as_deref(), Some("alice"));
        assert!(creds.email.is_none());

        let req = LoginRequest {
            email: Some("a@x.com".into()),
            username: None,
            password: Some("pw1".into()),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn login_rejects_missing_both_identifiers() {
        let req = LoginRequest {
            email: Some("  ".into()),
            username: None,
            password: Some("pw1".into()),
        };
        let err = req.validate().unwrap_err();
        assert_eq!(err.to_string(), "Username or email is required");
    }

    #[test]
    fn login_rejects_empty_password() {
        let req = LoginRequest {
            email: Some("a@x.com".into()),
            username: None,
            password: None,
        };
        let err = req.validate().unwrap_err();
        assert_eq!(err.to_string(), "Password is required");
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("user@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user example.com"));
    }

    #[test]
    fn public_user_serializes_camel_case_without_secrets() {
        let user = PublicUser {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            full_name: "Alice A".into(),
            avatar_url: "https://media.fake.local/avatars/a.png".into(),
            cover_image_url: String::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["fullName"], "Alice A");
        assert_eq!(json["coverImageUrl"], "");
        assert!(json.get("password").is_none());
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("refreshToken").is_none());
    }
}
