use anyhow::Context;
use axum::extract::FromRef;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use uuid::Uuid;

use crate::auth::dto::{PublicUser, SessionPayload};
use crate::auth::jwt::JwtKeys;
use crate::auth::repo::User;
use crate::state::AppState;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issue a fresh access/refresh pair for a user and persist the refresh
/// half on the record. One pair is live per user; issuing replaces the
/// stored refresh token and so invalidates the previous session.
///
/// Callers collapse any failure here into one opaque server error.
pub async fn issue_token_pair(state: &AppState, user_id: Uuid) -> anyhow::Result<TokenPair> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .with_context(|| format!("token issuance for missing user {user_id}"))?;

    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    User::store_refresh_token(&state.db, user.id, &refresh_token)
        .await
        .context("persist refresh token")?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .build()
}

/// Shape a granted session once: the same token pair feeds the cookie
/// directives and the response body, so the two cannot drift apart.
pub fn grant_session(
    jar: CookieJar,
    pair: TokenPair,
    user: PublicUser,
) -> (CookieJar, SessionPayload) {
    let jar = jar
        .add(session_cookie(ACCESS_COOKIE, pair.access_token.clone()))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh_token.clone()));
    let payload = SessionPayload {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    };
    (jar, payload)
}

pub fn revoke_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/").build())
        .remove(Cookie::build(REFRESH_COOKIE).path("/").build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn public_user() -> PublicUser {
        PublicUser {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            full_name: "Alice A".into(),
            avatar_url: "https://media.fake.local/avatars/a.png".into(),
            cover_image_url: String::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "header.access.sig".into(),
            refresh_token: "header.refresh.sig".into(),
        }
    }

    #[test]
    fn grant_sets_both_cookies_http_only_and_secure() {
        let (jar, _) = grant_session(CookieJar::new(), pair(), public_user());

        for (name, value) in [
            (ACCESS_COOKIE, "header.access.sig"),
            (REFRESH_COOKIE, "header.refresh.sig"),
        ] {
            let cookie = jar.get(name).expect(name);
            assert_eq!(cookie.value(), value);
            assert_eq!(cookie.http_only(), Some(true));
            assert_eq!(cookie.secure(), Some(true));
            assert_eq!(cookie.path(), Some("/"));
        }
    }

    #[test]
    fn grant_body_matches_cookie_tokens() {
        let (jar, payload) = grant_session(CookieJar::new(), pair(), public_user());
        assert_eq!(
            jar.get(ACCESS_COOKIE).unwrap().value(),
            payload.access_token
        );
        assert_eq!(
            jar.get(REFRESH_COOKIE).unwrap().value(),
            payload.refresh_token
        );
        assert_eq!(payload.user.username, "alice");
    }

    #[test]
    fn revoke_removes_both_cookies() {
        let (jar, _) = grant_session(CookieJar::new(), pair(), public_user());
        let jar = revoke_session(jar);
        assert!(jar.get(ACCESS_COOKIE).is_none());
        assert!(jar.get(REFRESH_COOKIE).is_none());
    }
}
