//! Authentication: guests by display name, registered accounts by
//! username and password, and the single administrator.
//!
//! Credentials are Argon2id PHC strings. Hashing and verification run on
//! the blocking pool so a burst of logins cannot stall the runtime.

use std::sync::OnceLock;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    Extension, Json,
};
use rand::{rngs::OsRng, RngCore};

use agora_shared::protocol::{AuthRequest, AuthResponse, MeResponse, RegisterRequest, UserDto};
use agora_shared::types::{AuditAction, NetworkIdentity, Role};
use agora_shared::validation::{
    is_reserved_name, normalize_display_name, validate_password, validate_username,
};
use agora_store::{Database, NewUser, StoreError, User};

use crate::api::{ApiJson, AppState};
use crate::error::ApiError;
use crate::gate::ClientIdentity;
use crate::notify::Notification;

/// Salt size for Argon2 (128 bits)
const SALT_SIZE: usize = 16;

/// Argon2id cost parameters for stored credentials
const ARGON2_PARAMS: Params = match Params::new(
    19 * 1024, // 19 MiB memory cost
    2,         // 2 iterations
    1,         // 1 lane
    Some(32),  // 32-byte output
) {
    Ok(params) => params,
    Err(_) => panic!("Invalid Argon2 parameters"),
};

fn argon2() -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, ARGON2_PARAMS)
}

/// Hash a credential into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)?;
    Ok(argon2().hash_password(password.as_bytes(), &salt)?.to_string())
}

/// Check a credential against a PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, phc: &str) -> bool {
    let parsed = match PasswordHash::new(phc) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "stored credential hash is malformed");
            return false;
        }
    };

    match argon2().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => true,
        Err(argon2::password_hash::Error::Password) => false,
        Err(e) => {
            tracing::warn!(error = %e, "credential verification failed");
            false
        }
    }
}

/// Hash checked when the username is unknown, so both failure paths cost
/// one Argon2 verification.
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("agora-placeholder-credential").unwrap_or_default())
}

async fn check_password(password: &str, phc: Option<String>) -> Result<bool, ApiError> {
    let password = password.to_string();
    let matched = tokio::task::spawn_blocking(move || match phc {
        Some(phc) => verify_password(&password, &phc),
        None => {
            verify_password(&password, dummy_hash());
            false
        }
    })
    .await?;
    Ok(matched)
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer session, if one was presented. A presented but
/// invalid token is an error, not an anonymous request.
pub(crate) async fn optional_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<User>, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };

    let claims = state.sessions.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "session rejected");
        ApiError::Unauthenticated
    })?;

    let user = state
        .with_db(|db| db.get_user(claims.sub))
        .await
        .map_err(|e| match e {
            ApiError::NotFound => ApiError::Unauthenticated,
            other => other,
        })?;

    if user.blocked {
        return Err(ApiError::AccessDenied);
    }
    Ok(Some(user))
}

pub(crate) async fn require_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<User, ApiError> {
    optional_session(state, headers)
        .await?
        .ok_or(ApiError::Unauthenticated)
}

/// Moderation guard: an admin bearer session, or the admin password in
/// the request.
pub(crate) async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    admin_password: Option<&str>,
) -> Result<User, ApiError> {
    if bearer_token(headers).is_some() {
        let user = require_session(state, headers).await?;
        return if user.role.is_admin() {
            Ok(user)
        } else {
            Err(ApiError::Forbidden)
        };
    }

    let password = admin_password
        .filter(|p| !p.is_empty())
        .ok_or(ApiError::AdminPasswordRequired)?;
    if !check_password(password, Some(state.config.admin_password_hash.clone())).await? {
        tracing::warn!("moderation request with wrong admin password");
        return Err(ApiError::InvalidAdminPassword);
    }

    let hash = state.config.admin_password_hash.clone();
    state.with_db(move |db| db.ensure_admin_user(&hash)).await
}

fn issue(state: &AppState, user: &User) -> AuthResponse {
    AuthResponse {
        success: true,
        is_admin: user.role.is_admin(),
        token: state
            .sessions
            .issue(user.id, user.role, state.config.session_ttl()),
        user: user_dto(user),
    }
}

pub(crate) fn user_dto(user: &User) -> UserDto {
    UserDto {
        id: user.id,
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        role: user.role,
        reputation_points: user.reputation_points,
        achievements: user.achievements.iter().copied().collect(),
        messages_sent: user.messages_sent,
        first_seen: user.first_seen,
        last_seen: user.last_seen,
    }
}

// ---------------------------------------------------------------------------
// Guests
// ---------------------------------------------------------------------------

fn find_or_create_guest(
    db: &Database,
    name: &str,
    identity: &NetworkIdentity,
) -> Result<User, StoreError> {
    match db.find_guest_by_display_name(name)? {
        Some(existing) => {
            db.touch_user(existing.id, identity)?;
            db.get_user(existing.id)
        }
        None => db.insert_user(&NewUser::guest(name, identity.clone())),
    }
}

/// Authenticate a guest by display name, creating the record on first
/// use. Also reports a display-name change seen from the same identity.
pub(crate) async fn guest_session_user(
    state: &AppState,
    name: &str,
    identity: &NetworkIdentity,
) -> Result<User, ApiError> {
    let (user, previous) = state
        .with_db(|db| {
            db.atomically(|db| {
                let previous = db.last_display_name_for(identity)?;
                let user = find_or_create_guest(db, name, identity)?;
                Ok((user, previous))
            })
        })
        .await?;

    if user.blocked {
        return Err(ApiError::AccessDenied);
    }
    announce_name_change(state, identity, previous, &user.display_name);
    Ok(user)
}

fn announce_name_change(
    state: &AppState,
    identity: &NetworkIdentity,
    previous: Option<String>,
    current: &str,
) {
    if let Some(previous) = previous.filter(|p| p != current) {
        tracing::info!(
            identity = %identity,
            from = %previous,
            to = %current,
            "display name changed"
        );
        state.notifier.notify(Notification::NameChanged {
            identity: identity.clone(),
            previous,
            current: current.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /auth` and `POST /auth/login`.
pub async fn authenticate(
    State(state): State<AppState>,
    Extension(ClientIdentity(identity)): Extension<ClientIdentity>,
    ApiJson(req): ApiJson<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    if let Some(username) = req.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        let password = req.password.as_deref().unwrap_or_default();
        return login(&state, &identity, username, password).await.map(Json);
    }

    let name = normalize_display_name(req.name.as_deref().unwrap_or_default())?;

    if is_reserved_name(&name) {
        let password = req
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ApiError::AdminPasswordRequired)?;
        if !check_password(password, Some(state.config.admin_password_hash.clone())).await? {
            tracing::warn!(identity = %identity, "admin login rejected");
            return Err(ApiError::InvalidAdminPassword);
        }
        let admin = admin_login(&state, &identity).await?;
        return Ok(Json(issue(&state, &admin)));
    }

    let user = guest_session_user(&state, &name, &identity).await?;
    tracing::info!(user = %user.id, name = %user.display_name, "guest authenticated");
    Ok(Json(issue(&state, &user)))
}

async fn admin_login(state: &AppState, identity: &NetworkIdentity) -> Result<User, ApiError> {
    let hash = state.config.admin_password_hash.clone();
    let (admin, previous) = state
        .with_db(|db| {
            db.atomically(|db| {
                let admin = db.ensure_admin_user(&hash)?;
                let previous = db.last_display_name_for(identity)?;
                db.touch_user(admin.id, identity)?;
                db.record_audit(AuditAction::AdminLogin, admin.id, Some(identity.as_str()), "")?;
                Ok((db.get_user(admin.id)?, previous))
            })
        })
        .await?;

    tracing::info!(identity = %identity, "admin authenticated");
    state.notifier.notify(Notification::AdminLogin {
        identity: identity.clone(),
    });
    announce_name_change(state, identity, previous, &admin.display_name);
    Ok(admin)
}

async fn login(
    state: &AppState,
    identity: &NetworkIdentity,
    username: &str,
    password: &str,
) -> Result<AuthResponse, ApiError> {
    let found = state
        .with_db(|db| db.find_user_by_username(username))
        .await?;

    let stored_hash = found.as_ref().and_then(|u| u.credential_hash.clone());
    let matched = check_password(password, stored_hash).await?;
    let user = match found {
        Some(user) if matched => user,
        _ => {
            tracing::debug!(identity = %identity, "login rejected");
            return Err(ApiError::InvalidCredentials);
        }
    };

    if user.blocked {
        return Err(ApiError::AccessDenied);
    }

    if user.role.is_admin() {
        let admin = admin_login(state, identity).await?;
        return Ok(issue(state, &admin));
    }

    let (user, previous) = state
        .with_db(|db| {
            db.atomically(|db| {
                let previous = db.last_display_name_for(identity)?;
                db.touch_user(user.id, identity)?;
                Ok((db.get_user(user.id)?, previous))
            })
        })
        .await?;
    tracing::info!(user = %user.id, "user logged in");
    announce_name_change(state, identity, previous, &user.display_name);
    Ok(issue(state, &user))
}

/// `POST /auth/register`.
pub async fn register(
    State(state): State<AppState>,
    Extension(ClientIdentity(identity)): Extension<ClientIdentity>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let username = req.username.trim().to_string();
    validate_username(&username)?;
    validate_password(&req.password)?;
    let display_name = normalize_display_name(&req.name)?;
    if is_reserved_name(&display_name) {
        return Err(ApiError::invalid_request("display name is reserved"));
    }

    let password = req.password;
    let credential_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await?
        .map_err(|e| ApiError::Upstream(format!("credential hashing failed: {e}")))?;

    let new = NewUser {
        username: Some(username),
        display_name,
        credential_hash: Some(credential_hash),
        role: Role::User,
        email: non_blank(req.email),
        phone: non_blank(req.phone),
        network_identity: (!identity.is_unknown()).then(|| identity.clone()),
    };

    let (user, previous) = state
        .with_db(|db| {
            db.atomically(|db| {
                let previous = db.last_display_name_for(&identity)?;
                Ok((db.insert_user(&new)?, previous))
            })
        })
        .await?;

    tracing::info!(user = %user.id, "account registered");
    announce_name_change(&state, &identity, previous, &user.display_name);
    Ok(Json(issue(&state, &user)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `GET /me`.
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let user = require_session(&state, &headers).await?;
    Ok(Json(MeResponse {
        success: true,
        user: user_dto(&user),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::tests::{call, harness, ADMIN_PASSWORD};
    use crate::notify::tests::wait_for;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn test_guest_authenticate() {
        let h = harness();
        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.1",
            None,
            Some(json!({"name": "  Alice "})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["isAdmin"], false);
        assert_eq!(body["user"]["displayName"], "Alice");
        assert_eq!(body["user"]["role"], "guest");

        let token = body["token"].as_str().unwrap();
        let (status, me) = call(&h.router, Method::GET, "/me", "10.0.0.1", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"]["displayName"], "Alice");
    }

    #[tokio::test]
    async fn test_empty_name() {
        let h = harness();
        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.1",
            None,
            Some(json!({"name": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": false, "error": "EMPTY_NAME"}));
    }

    #[tokio::test]
    async fn test_admin_password_outcomes() {
        let h = harness();
        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.1",
            None,
            Some(json!({"name": "Admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "ADMIN_PASSWORD_REQUIRED");

        let (_, body) = call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.1",
            None,
            Some(json!({"name": "admin", "password": "wrong"})),
        )
        .await;
        assert_eq!(body["error"], "INVALID_ADMIN_PASSWORD");

        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.1",
            None,
            Some(json!({"name": "admin", "password": ADMIN_PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isAdmin"], true);
        assert_eq!(body["user"]["role"], "admin");

        let events = h.state.with_db(|db| db.list_audit(10)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::AdminLogin);
        assert_eq!(events[0].subject_id.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let h = harness();
        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth/register",
            "10.0.0.2",
            None,
            Some(json!({
                "username": "carol",
                "name": "Carol",
                "password": "pa55word",
                "email": "c@example.com",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "user");
        assert_eq!(body["user"]["username"], "carol");

        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth/register",
            "10.0.0.3",
            None,
            Some(json!({"username": "carol", "name": "Other", "password": "pa55word"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "DUPLICATE_IDENTITY");

        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth/login",
            "10.0.0.2",
            None,
            Some(json!({"username": "carol", "password": "pa55word"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["displayName"], "Carol");
    }

    #[tokio::test]
    async fn test_login_failures_look_alike() {
        let h = harness();
        call(
            &h.router,
            Method::POST,
            "/auth/register",
            "10.0.0.2",
            None,
            Some(json!({"username": "dave", "name": "Dave", "password": "pa55word"})),
        )
        .await;

        let (wrong_status, wrong_body) = call(
            &h.router,
            Method::POST,
            "/auth/login",
            "10.0.0.2",
            None,
            Some(json!({"username": "dave", "password": "nope-nope"})),
        )
        .await;
        let (unknown_status, unknown_body) = call(
            &h.router,
            Method::POST,
            "/auth/login",
            "10.0.0.2",
            None,
            Some(json!({"username": "nobody", "password": "nope-nope"})),
        )
        .await;

        assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_status, unknown_status);
        assert_eq!(wrong_body, unknown_body);
        assert_eq!(wrong_body["error"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let h = harness();
        let (_, body) = call(
            &h.router,
            Method::POST,
            "/auth/register",
            "10.0.0.2",
            None,
            Some(json!({"username": "admin", "name": "Root", "password": "pa55word"})),
        )
        .await;
        assert_eq!(body["error"], "INVALID_USERNAME");

        let (_, body) = call(
            &h.router,
            Method::POST,
            "/auth/register",
            "10.0.0.2",
            None,
            Some(json!({"username": "erin", "name": "Erin", "password": "123"})),
        )
        .await;
        assert_eq!(body["error"], "WEAK_PASSWORD");
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let h = harness();
        let (status, body) =
            call(&h.router, Method::GET, "/me", "10.0.0.1", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHENTICATED");

        let (status, _) = call(&h.router, Method::GET, "/me", "10.0.0.1", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_name_change_notified() {
        let h = harness();
        for name in ["Frank", "Franky"] {
            call(
                &h.router,
                Method::POST,
                "/auth",
                "10.0.0.9",
                None,
                Some(json!({"name": name})),
            )
            .await;
        }

        let delivered = wait_for(&h.sink, 1).await;
        assert!(delivered
            .iter()
            .any(|t| t.contains("10.0.0.9 changed name from Frank to Franky")));
    }

    #[tokio::test]
    async fn test_login_reports_name_change() {
        let h = harness();
        call(
            &h.router,
            Method::POST,
            "/auth/register",
            "10.0.0.6",
            None,
            Some(json!({"username": "carol", "name": "Carol", "password": "pa55word"})),
        )
        .await;
        call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.5",
            None,
            Some(json!({"name": "Bob"})),
        )
        .await;

        let (status, _) = call(
            &h.router,
            Method::POST,
            "/auth/login",
            "10.0.0.5",
            None,
            Some(json!({"username": "carol", "password": "pa55word"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let delivered = wait_for(&h.sink, 1).await;
        assert!(delivered
            .iter()
            .any(|t| t.contains("10.0.0.5 changed name from Bob to Carol")));
    }

    #[tokio::test]
    async fn test_admin_login_reports_name_change() {
        let h = harness();
        call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.11",
            None,
            Some(json!({"name": "Gina"})),
        )
        .await;

        let (status, body) = call(
            &h.router,
            Method::POST,
            "/auth",
            "10.0.0.11",
            None,
            Some(json!({"name": "admin", "password": ADMIN_PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isAdmin"], true);

        // Admin login itself is announced too.
        let delivered = wait_for(&h.sink, 2).await;
        assert!(delivered
            .iter()
            .any(|t| t.contains("10.0.0.11 changed name from Gina to")));
    }
}
