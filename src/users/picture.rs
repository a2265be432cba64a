use axum::{
    Json, debug_handler,
    extract::{Multipart, Path, State},
    response::Response,
};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::{
    AppError, AppResult,
    auth::Principal,
    media::{self, BlobStore},
    models::UserView,
    users,
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn upload(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(blobs): State<BlobStore>,
    principal: Principal,

    multipart: Multipart,
) -> AppResult<Json<UserView>> {
    principal.ensure_is(&id)?;
    let user = users::find(&db_pool, &id).await?;

    let mut upload = media::read_upload(multipart).await?;
    if !upload.content_type.starts_with("image/") {
        return Err(format!("{} is not an image type", upload.content_type).into());
    }
    upload.post_id = None;
    let picture = media::save(&db_pool, &blobs, &user.id, upload).await?;

    sqlx::query("UPDATE users SET profile_picture_id = ?, updated_at = ? WHERE id = ?")
        .bind(&picture.id)
        .bind(OffsetDateTime::now_utc())
        .bind(&user.id)
        .execute(&db_pool)
        .await?;

    if let Some(old) = user.profile_picture_id {
        sqlx::query("DELETE FROM media WHERE id = ?")
            .bind(&old)
            .execute(&db_pool)
            .await?;
        media::purge_blobs(&blobs, &[old]).await;
    }
    info!(user_id = %user.id, media_id = %picture.id, "replaced profile picture");

    Ok(Json(users::find(&db_pool, &user.id).await?.into()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn download(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(blobs): State<BlobStore>,
) -> AppResult<Response> {
    let user = users::find(&db_pool, &id).await?;
    let picture_id = user
        .profile_picture_id
        .ok_or(AppError::NotFound("profile picture"))?;

    let picture = media::find(&db_pool, &picture_id).await?;
    media::serve(&blobs, &picture).await
}
