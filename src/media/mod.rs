pub mod store;

pub use store::BlobStore;

use axum::{
    Json, Router, debug_handler,
    extract::{Multipart, Path, State},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState,
    auth::Principal,
    models::{Media, MediaView},
    posts,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/{id}", get(download).delete(delete))
        .route("/post/{post_id}", get(for_post))
}

/// A file pulled out of a multipart body.
#[derive(Debug)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub post_id: Option<String>,
}

/// Reads the `file` part, plus `postId` when present.
pub async fn read_upload(mut multipart: Multipart) -> AppResult<Upload> {
    let mut file = None;
    let mut post_id = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let data = field.bytes().await?.to_vec();
                file = Some((file_name, content_type, data));
            }
            Some("postId") => {
                let text = field.text().await?;
                let text = text.trim();
                if !text.is_empty() {
                    post_id = Some(text.to_owned());
                }
            }
            _ => {}
        }
    }

    let (file_name, content_type, data) = file.ok_or("multipart field \"file\" is required")?;
    Ok(Upload {
        file_name,
        content_type,
        data,
        post_id,
    })
}

/// Writes the blob first and the row second, so a row never points at
/// missing bytes.
pub async fn save(
    db_pool: &SqlitePool,
    blobs: &BlobStore,
    owner_id: &str,
    upload: Upload,
) -> AppResult<Media> {
    let id = Uuid::now_v7();
    blobs.put(id, &upload.data).await?;

    let media = Media {
        id: id.to_string(),
        owner_id: owner_id.to_owned(),
        post_id: upload.post_id,
        file_name: upload.file_name,
        content_type: upload.content_type,
        size: upload.data.len() as i64,
        created_at: OffsetDateTime::now_utc(),
    };

    let inserted = sqlx::query(
        "INSERT INTO media (id,owner_id,post_id,file_name,content_type,size,created_at) values (?,?,?,?,?,?,?)",
    )
    .bind(&media.id)
    .bind(&media.owner_id)
    .bind(&media.post_id)
    .bind(&media.file_name)
    .bind(&media.content_type)
    .bind(media.size)
    .bind(media.created_at)
    .execute(db_pool)
    .await;

    if let Err(e) = inserted {
        blobs.delete(id).await?;
        return Err(e.into());
    }

    info!(media_id = %media.id, owner_id, size = media.size, "stored media");
    Ok(media)
}

pub async fn find(db_pool: &SqlitePool, id: &str) -> AppResult<Media> {
    sqlx::query_as("SELECT * FROM media WHERE id = ?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("media"))
}

/// Media of each post, oldest first, in one query.
pub async fn for_posts(db_pool: &SqlitePool, post_ids: &[&str]) -> AppResult<Vec<Media>> {
    if post_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM media WHERE post_id IN (");
    let mut ids = query.separated(",");
    for id in post_ids {
        ids.push_bind(*id);
    }
    query.push(") ORDER BY id");

    Ok(query.build_query_as().fetch_all(db_pool).await?)
}

/// Removes blobs whose rows are already gone. Failures are logged, not
/// returned.
pub async fn purge_blobs(blobs: &BlobStore, ids: &[String]) {
    for id in ids {
        let result = match Uuid::parse_str(id) {
            Ok(uuid) => blobs.delete(uuid).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(media_id = %id, error = %e, "could not remove blob");
        }
    }
}

/// Streams a media row's bytes back with its stored content type.
pub async fn serve(blobs: &BlobStore, media: &Media) -> AppResult<Response> {
    let data = blobs.get(Uuid::parse_str(&media.id)?).await?;
    let disposition = format!("inline; filename=\"{}\"", header_safe(&media.file_name));

    Ok((
        [
            (CONTENT_TYPE, media.content_type.clone()),
            (CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

fn header_safe(file_name: &str) -> String {
    file_name
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect()
}

#[debug_handler(state = AppState)]
async fn upload(
    State(db_pool): State<SqlitePool>,
    State(blobs): State<BlobStore>,
    principal: Principal,

    multipart: Multipart,
) -> AppResult<Response> {
    let upload = read_upload(multipart).await?;
    if let Some(post_id) = &upload.post_id {
        let post = posts::find(&db_pool, post_id).await?;
        principal.ensure_is(&post.user_id)?;
    }

    let media = save(&db_pool, &blobs, &principal.user_id, upload).await?;
    Ok((StatusCode::CREATED, Json(MediaView::from(media))).into_response())
}

#[debug_handler(state = AppState)]
async fn download(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(blobs): State<BlobStore>,
) -> AppResult<Response> {
    let media = find(&db_pool, &id).await?;
    serve(&blobs, &media).await
}

#[debug_handler(state = AppState)]
async fn for_post(
    Path(post_id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<MediaView>>> {
    let media = for_posts(&db_pool, &[post_id.as_str()]).await?;
    Ok(Json(media.into_iter().map(MediaView::from).collect()))
}

#[debug_handler(state = AppState)]
async fn delete(
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(blobs): State<BlobStore>,
    principal: Principal,
) -> AppResult<StatusCode> {
    let media = find(&db_pool, &id).await?;
    principal.ensure_is(&media.owner_id)?;

    // users.profile_picture_id is cleared by the FK
    sqlx::query("DELETE FROM media WHERE id = ?")
        .bind(&media.id)
        .execute(&db_pool)
        .await?;
    purge_blobs(&blobs, &[media.id]).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        users::{self, NewUser},
    };
    use tempfile::TempDir;

    fn upload(data: &[u8]) -> Upload {
        Upload {
            file_name: "cat \"1\".png".into(),
            content_type: "image/png".into(),
            data: data.to_vec(),
            post_id: None,
        }
    }

    #[tokio::test]
    async fn save_serve_and_list() {
        let db_pool = db::memory().await.unwrap();
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        let owner = users::create(
            &db_pool,
            NewUser {
                username: "alice".into(),
                email: "alice@example.org".into(),
                bio: String::new(),
            },
        )
        .await
        .unwrap();

        let media = save(&db_pool, &blobs, &owner.id, upload(b"img")).await.unwrap();
        assert_eq!(media.size, 3);
        assert_eq!(find(&db_pool, &media.id).await.unwrap().owner_id, owner.id);

        let res = serve(&blobs, &media).await.unwrap();
        assert_eq!(res.headers()[CONTENT_TYPE], "image/png");
        assert_eq!(
            res.headers()[CONTENT_DISPOSITION],
            "inline; filename=\"cat 1.png\""
        );

        assert!(for_posts(&db_pool, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_saves_leave_no_row() {
        let db_pool = db::memory().await.unwrap();
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path().to_path_buf(), 2).await.unwrap();

        let err = save(&db_pool, &blobs, "nobody", upload(b"too big"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media")
            .fetch_one(&db_pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
