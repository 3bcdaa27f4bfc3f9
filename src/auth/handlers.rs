use anyhow::Context;
use axum::{
    extract::{
        multipart::Field, DefaultBodyLimit, FromRef, Multipart, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, PublicUser, RefreshRequest, RegisterForm, SessionPayload},
        jwt::{AuthUser, JwtKeys},
        password::{hash_password, verify_password},
        repo::{is_unique_violation, NewUser, User},
        session::{self, REFRESH_COOKIE},
    },
    error::{ApiError, ApiResponse},
    media::{self, UploadedFile},
    state::AppState,
};

const REGISTER_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/register",
            post(register).layer(DefaultBodyLimit::max(REGISTER_BODY_LIMIT)),
        )
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/refresh-token", post(refresh_token))
        .route("/users/me", get(current_user))
}

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<PublicUser>>), ApiError> {
    let form = collect_register_form(&mut multipart).await?;
    let reg = form.validate()?;

    let existing = User::find_by_username_or_email(
        &state.db,
        Some(reg.username.as_str()),
        Some(reg.email.as_str()),
    )
    .await?;
    if existing.is_some() {
        warn!(username = %reg.username, "registration for already existing user");
        return Err(ApiError::conflict(
            "User with this email or username already exists",
        ));
    }

    // required upload; a failure here aborts before any record is written
    let avatar_url = media::upload_image(&state, "avatars", &reg.avatar)
        .await
        .context("avatar upload")?;

    let cover_image_url = match &reg.cover_image {
        Some(file) => match media::upload_image(&state, "covers", file).await {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cover image upload failed, storing empty url");
                String::new()
            }
        },
        None => String::new(),
    };

    let password_hash = hash_password(&reg.password)?;

    let user = match User::create(
        &state.db,
        NewUser {
            username: &reg.username,
            email: &reg.email,
            full_name: &reg.full_name,
            avatar_url: &avatar_url,
            cover_image_url: &cover_image_url,
            password_hash: &password_hash,
        },
    )
    .await
    {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => {
            warn!(username = %reg.username, "registration lost the uniqueness race");
            return Err(ApiError::conflict(
                "User with this email or username already exists",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let created = User::find_public_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!("created user {} not readable back", user.id))
        })?;

    info!(user_id = %user.id, username = %created.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            StatusCode::CREATED,
            created,
            "User registered successfully",
        )),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<SessionPayload>>), ApiError> {
    let creds = payload.validate()?;

    let user = User::find_by_username_or_email(
        &state.db,
        creds.username.as_deref(),
        creds.email.as_deref(),
    )
    .await?
    .ok_or_else(|| {
        warn!("login for unknown identifier");
        ApiError::unauthorized("User does not exist")
    })?;

    if !verify_password(&creds.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::unauthorized("Incorrect password"));
    }

    let pair = session::issue_token_pair(&state, user.id).await?;
    let public = User::find_public_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user {} vanished during login", user.id)))?;

    let (jar, body) = session::grant_session(jar, pair, public);
    info!(user_id = %user.id, "user logged in");
    Ok((jar, Json(ApiResponse::ok(body, "User logged in successfully"))))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<()>>), ApiError> {
    User::clear_refresh_token(&state.db, user_id).await?;
    info!(user_id = %user_id, "user logged out");
    Ok((
        session::revoke_session(jar),
        Json(ApiResponse::ok((), "User logged out successfully")),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, Json<ApiResponse<SessionPayload>>), ApiError> {
    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| payload.and_then(|Json(p)| p.refresh_token))
        .ok_or_else(|| ApiError::unauthorized("Refresh token is required"))?;

    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&presented).map_err(|_| {
        warn!("refresh with invalid token");
        ApiError::unauthorized("Invalid refresh token")
    })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    // a rotated-out token still verifies as a JWT but no longer matches the
    // record, so it cannot renew the session
    if user.refresh_token.as_deref() != Some(presented.as_str()) {
        warn!(user_id = %user.id, "refresh with stale token");
        return Err(ApiError::unauthorized("Refresh token is expired or already used"));
    }

    let pair = session::issue_token_pair(&state, user.id).await?;
    let public = User::find_public_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!("user {} vanished during refresh", user.id))
        })?;

    let (jar, body) = session::grant_session(jar, pair, public);
    info!(user_id = %user.id, "session refreshed");
    Ok((jar, Json(ApiResponse::ok(body, "Access token refreshed"))))
}

#[instrument(skip(state))]
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let user = User::find_public_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    Ok(Json(ApiResponse::ok(user, "Current user fetched successfully")))
}

async fn collect_register_form(multipart: &mut Multipart) -> Result<RegisterForm, ApiError> {
    let mut form = RegisterForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        match name.as_str() {
            "fullName" => form.full_name = Some(text_field(field).await?),
            "email" => form.email = Some(text_field(field).await?),
            "username" => form.username = Some(text_field(field).await?),
            "password" => form.password = Some(text_field(field).await?),
            "avatar" => form.avatar = Some(file_field(field).await?),
            "coverImage" => form.cover_image = Some(file_field(field).await?),
            _ => {}
        }
    }
    Ok(form)
}

async fn text_field(field: Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(bad_multipart)
}

async fn file_field(field: Field<'_>) -> Result<UploadedFile, ApiError> {
    let file_name = field.file_name().map(|s| s.to_string());
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let bytes = field.bytes().await.map_err(bad_multipart)?;
    Ok(UploadedFile {
        file_name,
        content_type,
        bytes,
    })
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("Malformed multipart body: {err}"))
}
