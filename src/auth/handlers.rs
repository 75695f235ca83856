use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ApiResponse, AuthData, ChangePasswordRequest, LoginRequest, PublicUser,
            RegisterRequest, UpdateProfileRequest,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        password,
        repo::StoreError,
        repo_types::{NewUser, ProfileChanges, Role},
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/profile", get(get_profile).put(update_profile))
        .route("/auth/change-password", put(change_password))
        .route("/auth/users", get(list_users))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthData>>), ApiError> {
    let email = normalize_email(&payload.email);

    if payload.first_name.is_empty()
        || payload.last_name.is_empty()
        || email.is_empty()
        || payload.password.is_empty()
        || payload.confirm_password.is_empty()
    {
        return Err(ApiError::Validation(
            "All required fields must be filled".to_string(),
        ));
    }

    if payload.password != payload.confirm_password {
        return Err(ApiError::Validation("Passwords do not match".to_string()));
    }

    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(ApiError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::Validation(
            "Please provide a valid email address".to_string(),
        ));
    }

    // Fast path for the common duplicate; the store's uniqueness constraint
    // still backstops concurrent registrations below.
    if let Some(_existing) = state.store.find_by_email(&email).await? {
        warn!(email = %email, "email already registered");
        return Err(ApiError::Conflict(
            "User with this email already exists".to_string(),
        ));
    }

    let hash = password::hash_password(&payload.password).await?;

    let user = state
        .store
        .insert(NewUser {
            email,
            password_hash: hash,
            first_name: payload.first_name,
            last_name: payload.last_name,
            phone: payload.phone,
            address: payload.address,
        })
        .await
        .map_err(|e| match e {
            StoreError::DuplicateEmail => {
                ApiError::Conflict("User with this email already exists".to_string())
            }
            other => ApiError::Store(other),
        })?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user)?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "User registered successfully",
            AuthData {
                user: user.into(),
                token,
            },
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthData>>, ApiError> {
    let email = normalize_email(&payload.email);

    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    // Unknown email, inactive account and bad password all answer with the
    // same message so callers cannot probe which addresses exist.
    let invalid = || ApiError::Auth("Invalid email or password".to_string());

    let user = match state.store.find_by_email(&email).await? {
        Some(u) if u.is_active => u,
        Some(_) => {
            warn!(email = %email, "login on inactive account");
            return Err(invalid());
        }
        None => {
            warn!(email = %email, "login unknown email");
            return Err(invalid());
        }
    };

    if !password::verify_password(&payload.password, &user.password_hash).await? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(invalid());
    }

    state.store.record_login(user.id).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(ApiResponse::with_message(
        "Login successful",
        AuthData {
            user: user.into(),
            token,
        },
    )))
}

/// Claims are stateless, so logout is an acknowledgment; the client drops
/// its token.
#[instrument]
pub async fn logout() -> Json<ApiResponse<()>> {
    Json(ApiResponse::message("Logged out successfully"))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let user = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(ApiResponse::data(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    // Names must stay non-empty; phone and address may be cleared.
    let changes = ProfileChanges {
        first_name: payload.first_name.filter(|v| !v.is_empty()),
        last_name: payload.last_name.filter(|v| !v.is_empty()),
        phone: payload.phone,
        address: payload.address,
    };

    let user = state
        .store
        .update_profile(claims.sub, changes)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    info!(user_id = %user.id, "profile updated");
    Ok(Json(ApiResponse::with_message(
        "Profile updated successfully",
        user.into(),
    )))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    if payload.current_password.is_empty()
        || payload.new_password.is_empty()
        || payload.confirm_password.is_empty()
    {
        return Err(ApiError::Validation(
            "All password fields are required".to_string(),
        ));
    }

    if payload.new_password != payload.confirm_password {
        return Err(ApiError::Validation(
            "New passwords do not match".to_string(),
        ));
    }

    if payload.new_password.len() < 8 {
        return Err(ApiError::Validation(
            "New password must be at least 8 characters long".to_string(),
        ));
    }

    let user = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if !password::verify_password(&payload.current_password, &user.password_hash).await? {
        warn!(user_id = %user.id, "change password with wrong current password");
        return Err(ApiError::Auth("Current password is incorrect".to_string()));
    }

    let hash = password::hash_password(&payload.new_password).await?;
    if !state.store.set_password_hash(user.id, &hash).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    info!(user_id = %user.id, "password changed");
    Ok(Json(ApiResponse::message("Password changed successfully")))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<ApiResponse<Vec<PublicUser>>>, ApiError> {
    if claims.role != Role::Admin {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    let users = state.store.list().await?;
    Ok(Json(ApiResponse::data(
        users.into_iter().map(PublicUser::from).collect(),
    )))
}
