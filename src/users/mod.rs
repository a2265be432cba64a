mod picture;
mod profile;
mod register;

use axum::{
    Router,
    routing::{get, post, put},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{AppError, AppResult, AppState, db, follows, models::User};

pub fn router(dev_tokens: bool) -> Router<AppState> {
    let router = Router::new()
        .route("/", get(profile::list))
        .route("/register", post(register::register))
        .route("/search", get(profile::search))
        .route("/username/{username}", get(profile::by_username))
        .route("/email/{email}", get(profile::by_email))
        .route(
            "/{id}",
            get(profile::by_id)
                .patch(profile::update)
                .delete(profile::delete),
        )
        .route(
            "/{id}/profile-picture",
            put(picture::upload).get(picture::download),
        )
        .route("/{id}/followers", get(follows::followers))
        .route("/{id}/following", get(follows::following));

    if dev_tokens {
        router.route("/token", post(register::dev_token))
    } else {
        router
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub bio: String,
}

/// Partial update: absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
}

pub async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<User> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("user"))
}

pub async fn find_by_username(db_pool: &SqlitePool, username: &str) -> AppResult<User> {
    sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("user"))
}

/// Looks a user up by id, falling back to username.
pub async fn resolve(db_pool: &SqlitePool, id_or_username: &str) -> AppResult<User> {
    sqlx::query_as(
        "SELECT * FROM users WHERE id = ? OR username = ? ORDER BY (id = ?) DESC LIMIT 1",
    )
    .bind(id_or_username)
    .bind(id_or_username)
    .bind(id_or_username)
    .fetch_optional(db_pool)
    .await?
    .ok_or(AppError::NotFound("user"))
}

pub async fn create(db_pool: &SqlitePool, new: NewUser) -> AppResult<User> {
    let username = validate_username(&new.username)?;
    let email = validate_email(&new.email)?;
    let now = OffsetDateTime::now_utc();

    let user = User {
        id: db::new_id(),
        username,
        email,
        bio: new.bio.trim().to_owned(),
        profile_picture_id: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO users (id,username,email,bio,created_at,updated_at) values (?,?,?,?,?,?)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.bio)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(db_pool)
    .await
    .map_err(taken)?;

    Ok(user)
}

pub async fn update(db_pool: &SqlitePool, id: &str, patch: UpdateUser) -> AppResult<User> {
    let username = patch.username.as_deref().map(validate_username).transpose()?;
    let email = patch.email.as_deref().map(validate_email).transpose()?;
    let bio = patch.bio.map(|b| b.trim().to_owned());
    if username.is_none() && email.is_none() && bio.is_none() {
        return Err("nothing to update".into());
    }

    let result = sqlx::query(
        "UPDATE users SET username = COALESCE(?, username), email = COALESCE(?, email), \
         bio = COALESCE(?, bio), updated_at = ? WHERE id = ?",
    )
    .bind(username)
    .bind(email)
    .bind(bio)
    .bind(OffsetDateTime::now_utc())
    .bind(id)
    .execute(db_pool)
    .await
    .map_err(taken)?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
    }
    find(db_pool, id).await
}

fn taken(err: sqlx::Error) -> AppError {
    match AppError::from(err) {
        AppError::Conflict(_) => AppError::Conflict("username or email already taken".to_owned()),
        other => other,
    }
}

pub fn validate_username(raw: &str) -> AppResult<String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err("username is required".into());
    }
    if username.chars().count() > 32 {
        return Err("username is longer than 32 characters".into());
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err("username may only contain letters, digits, '_', '.' and '-'".into());
    }
    Ok(username.to_owned())
}

pub fn validate_email(raw: &str) -> AppResult<String> {
    let email = raw.trim();
    if email.is_empty() {
        return Err("email is required".into());
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(format!("{email:?} is not a valid email").into());
    }
    Ok(email.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_owned(),
            email: format!("{username}@example.org"),
            bio: String::new(),
        }
    }

    #[tokio::test]
    async fn usernames_and_emails_are_unique() {
        let db_pool = db::memory().await.unwrap();
        create(&db_pool, new_user("alice")).await.unwrap();

        let err = create(&db_pool, new_user("alice")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = create(
            &db_pool,
            NewUser {
                username: "alice2".into(),
                email: "ALICE@example.org".into(),
                bio: String::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn resolve_accepts_id_or_username() {
        let db_pool = db::memory().await.unwrap();
        let alice = create(&db_pool, new_user("alice")).await.unwrap();

        assert_eq!(resolve(&db_pool, &alice.id).await.unwrap().id, alice.id);
        assert_eq!(resolve(&db_pool, "alice").await.unwrap().id, alice.id);
        assert!(matches!(
            resolve(&db_pool, "nobody").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let db_pool = db::memory().await.unwrap();
        let alice = create(&db_pool, new_user("alice")).await.unwrap();

        let patch = UpdateUser {
            bio: Some("  hello  ".into()),
            ..Default::default()
        };
        let updated = update(&db_pool, &alice.id, patch).await.unwrap();
        assert_eq!(updated.bio, "hello");
        assert_eq!(updated.username, "alice");
        assert_eq!(updated.email, "alice@example.org");

        let err = update(&db_pool, &alice.id, UpdateUser::default()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn validation() {
        assert!(validate_username("  ").is_err());
        assert!(validate_username("has space").is_err());
        assert_eq!(validate_username(" bob_1 ").unwrap(), "bob_1");
        assert!(validate_email("nope").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@@b.c").is_err());
        assert_eq!(validate_email("Bob@Just.Edu.Jo").unwrap(), "bob@just.edu.jo");
    }
}
