use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use jitter::{AppState, auth::TokenKeys, config::Config, db, media::BlobStore};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    keys: TokenKeys,
    _media: TempDir,
}

struct TestUser {
    id: String,
    token: String,
}

async fn app() -> TestApp {
    let media = TempDir::new().unwrap();
    let config = Config {
        media_dir: media.path().to_path_buf(),
        max_upload_bytes: 1024,
        token_secret: "integration-secret".to_owned(),
        dev_tokens: true,
        ..Config::default()
    };

    let db_pool = db::memory().await.unwrap();
    let blobs = BlobStore::new(config.media_dir.clone(), config.max_upload_bytes)
        .await
        .unwrap();
    let state = AppState::new(db_pool, blobs, config);
    let keys = state.keys.clone();

    TestApp {
        app: jitter::router(state),
        keys,
        _media: media,
    }
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
        };
        (status, body)
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        self.send(req).await
    }

    async fn register(&self, username: &str) -> TestUser {
        let (status, body) = self
            .call(
                Method::POST,
                "/users/register",
                None,
                Some(json!({ "username": username, "email": format!("{username}@example.org") })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        let id = body["id"].as_str().unwrap().to_owned();
        let token = self.keys.issue(&id, username).unwrap();
        TestUser { id, token }
    }

    async fn post(&self, author: &TestUser, content: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/posts",
                Some(&author.token),
                Some(json!({ "content": content })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_owned()
    }
}

#[tokio::test]
async fn registration_validates_and_rejects_duplicates() {
    let t = app().await;
    t.register("alice").await;

    let (status, body) = t
        .call(
            Method::POST,
            "/users/register",
            None,
            Some(json!({ "username": "alice", "email": "other@example.org" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already taken"));

    let (status, _) = t
        .call(
            Method::POST,
            "/users/register",
            None,
            Some(json!({ "username": "bob", "email": "not-an-email" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t.call(Method::GET, "/users/username/alice", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@example.org");

    let (status, _) = t.call(Method::GET, "/users/username/nobody", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = t.call(Method::GET, "/users/search?q=ALI", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dev_tokens_authenticate() {
    let t = app().await;
    let alice = t.register("alice").await;

    let (status, body) = t
        .call(Method::POST, "/users/token", None, Some(json!({ "username": "alice" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], alice.id.as_str());
    let token = body["token"].as_str().unwrap();

    let (status, _) = t.call(Method::GET, "/notifications", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn mutations_need_a_principal_and_ownership() {
    let t = app().await;
    let alice = t.register("alice").await;
    let bob = t.register("bob").await;

    let (status, _) = t
        .call(Method::POST, "/posts", None, Some(json!({ "content": "hi" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .call(Method::POST, "/posts", Some("not-a-jwt"), Some(json!({ "content": "hi" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = format!("/users/{}", alice.id);
    let (status, _) = t
        .call(Method::PATCH, &uri, Some(&bob.token), Some(json!({ "bio": "pwned" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .call(Method::PATCH, &uri, Some(&alice.token), Some(json!({ "bio": "hello" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bio"], "hello");
    assert_eq!(body["username"], "alice");

    let post_id = t.post(&alice, "mine").await;
    let (status, _) = t
        .call(Method::DELETE, &format!("/posts/{post_id}"), Some(&bob.token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t
        .call(Method::DELETE, &format!("/posts/{post_id}"), Some(&alice.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn follow_feed_and_notifications() {
    let t = app().await;
    let alice = t.register("alice").await;
    let bob = t.register("bob").await;

    let follow = json!({ "followingId": alice.id });
    let (status, first) = t
        .call(Method::POST, "/follows", Some(&bob.token), Some(follow.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, again) = t
        .call(Method::POST, "/follows", Some(&bob.token), Some(follow))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], again["id"]);

    let (status, _) = t
        .call(
            Method::POST,
            "/follows",
            Some(&bob.token),
            Some(json!({ "followingId": bob.id })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let post_id = t.post(&alice, "hello followers").await;

    let (_, feed) = t.call(Method::GET, "/posts/feed?size=5", Some(&bob.token), None).await;
    assert_eq!(feed["totalElements"], 1);
    assert_eq!(feed["content"][0]["id"], post_id.as_str());

    let (_, inbox) = t.call(Method::GET, "/notifications", Some(&bob.token), None).await;
    assert_eq!(inbox[0]["type"], "NEW_POST");
    assert_eq!(inbox[0]["sourceUsername"], "alice");

    let (_, inbox) = t.call(Method::GET, "/notifications", Some(&alice.token), None).await;
    assert_eq!(inbox[0]["type"], "FOLLOW");
    let note_id = inbox[0]["id"].as_str().unwrap().to_owned();

    let (_, unread) = t
        .call(Method::GET, "/notifications/unread/count", Some(&alice.token), None)
        .await;
    assert_eq!(unread, 1);

    let (status, _) = t
        .call(
            Method::PUT,
            &format!("/notifications/{note_id}/read"),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, note) = t
        .call(
            Method::PUT,
            &format!("/notifications/{note_id}/read"),
            Some(&alice.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(note["read"], true);

    let (_, followers) = t
        .call(Method::GET, &format!("/users/{}/followers", alice.id), None, None)
        .await;
    assert_eq!(followers[0]["username"], "bob");

    let (status, _) = t
        .call(
            Method::DELETE,
            &format!("/follows/user/{}", alice.id),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t
        .call(
            Method::DELETE,
            &format!("/follows/user/{}", alice.id),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn likes_are_idempotent_and_counted() {
    let t = app().await;
    let alice = t.register("alice").await;
    let bob = t.register("bob").await;
    let post_id = t.post(&alice, "like me").await;
    let like = format!("/posts/{post_id}/like");

    let (status, _) = t.call(Method::POST, &like, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = t.call(Method::POST, &like, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, post) = t.call(Method::GET, &format!("/posts/{post_id}"), None, None).await;
    assert_eq!(post["likesCount"], 1);

    let (_, inbox) = t.call(Method::GET, "/notifications", Some(&alice.token), None).await;
    let likes: Vec<_> = inbox
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["type"] == "LIKE")
        .collect();
    assert_eq!(likes.len(), 1);

    // liking your own post is fine but silent
    t.call(Method::POST, &like, Some(&alice.token), None).await;
    let (_, unread) = t
        .call(Method::GET, "/notifications/unread/count", Some(&alice.token), None)
        .await;
    assert_eq!(unread, 1);

    let (status, _) = t.call(Method::DELETE, &like, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.call(Method::DELETE, &like, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, post) = t.call(Method::GET, &format!("/posts/{post_id}"), None, None).await;
    assert_eq!(post["likesCount"], 1);

    let bookmark = format!("/posts/{post_id}/bookmark");
    t.call(Method::POST, &bookmark, Some(&bob.token), None).await;
    let (_, saved) = t.call(Method::GET, "/bookmarks", Some(&bob.token), None).await;
    assert_eq!(saved[0]["id"], post_id.as_str());
}

#[tokio::test]
async fn comments_are_enriched_and_counted() {
    let t = app().await;
    let alice = t.register("alice").await;
    let bob = t.register("bob").await;
    let post_id = t.post(&alice, "talk to me").await;
    let comments = format!("/posts/{post_id}/comments");

    let (status, _) = t
        .call(Method::POST, &comments, Some(&bob.token), Some(json!({ "content": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, comment) = t
        .call(Method::POST, &comments, Some(&bob.token), Some(json!({ "content": "hey" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["username"], "bob");

    let (_, listed) = t.call(Method::GET, &comments, None, None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (_, post) = t.call(Method::GET, &format!("/posts/{post_id}"), None, None).await;
    assert_eq!(post["commentsCount"], 1);

    let comment_uri = format!("/comments/{}", comment["id"].as_str().unwrap());
    let (status, _) = t.call(Method::DELETE, &comment_uri, Some(&alice.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.call(Method::DELETE, &comment_uri, Some(&bob.token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, post) = t.call(Method::GET, &format!("/posts/{post_id}"), None, None).await;
    assert_eq!(post["commentsCount"], 0);
}

#[tokio::test]
async fn chats_dedupe_and_track_unread() {
    let t = app().await;
    let alice = t.register("alice").await;
    let bob = t.register("bob").await;

    let (status, chat) = t
        .call(Method::POST, "/api/chat/create/bob", Some(&alice.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, same) = t
        .call(
            Method::POST,
            &format!("/api/chat/create/{}", alice.id),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(chat["id"], same["id"]);
    let chat_id = chat["id"].as_str().unwrap().to_owned();

    let (status, _) = t
        .call(Method::POST, "/api/chat/create/alice", Some(&alice.token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let send = format!("/api/chat/{chat_id}/send");
    let (status, message) = t
        .call(Method::POST, &send, Some(&alice.token), Some(json!({ "content": "hi bob" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["type"], "TEXT");
    assert_eq!(message["read"], false);

    let (status, _) = t
        .call(
            Method::POST,
            &send,
            Some(&alice.token),
            Some(json!({ "content": "hi", "type": "HOLOGRAM" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listed) = t.call(Method::GET, "/api/chat/list", Some(&bob.token), None).await;
    assert_eq!(listed[0]["unreadCount"], 1);
    assert_eq!(listed[0]["otherUser"]["username"], "alice");
    assert_eq!(listed[0]["lastMessage"]["content"], "hi bob");

    let (status, _) = t
        .call(Method::PUT, &format!("/api/chat/{chat_id}/read"), Some(&bob.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = t.call(Method::GET, "/api/chat/list", Some(&bob.token), None).await;
    assert_eq!(listed[0]["unreadCount"], 0);

    let (_, page) = t
        .call(
            Method::GET,
            &format!("/api/chat/{chat_id}/messages?page=0&size=10"),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(page["totalElements"], 1);
    assert_eq!(page["content"][0]["senderUsername"], "alice");

    let eve = t.register("eve").await;
    let (status, _) = t
        .call(Method::GET, &format!("/api/chat/{chat_id}"), Some(&eve.token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

fn multipart(boundary: &str, file_name: &str, content_type: &str, data: &[u8]) -> Body {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Body::from(body)
}

fn upload(uri: &str, method: Method, token: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARYX")
        .body(multipart("XBOUNDARYX", "pic.png", "image/png", data))
        .unwrap()
}

#[tokio::test]
async fn media_upload_download_and_limits() {
    let t = app().await;
    let alice = t.register("alice").await;

    let (status, media) = t
        .send(upload("/media/upload", Method::POST, &alice.token, b"fake png"))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{media}");
    let url = media["url"].as_str().unwrap().to_owned();

    let res = t
        .app
        .clone()
        .oneshot(Request::get(url.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"fake png");

    let (status, _) = t
        .send(upload("/media/upload", Method::POST, &alice.token, b""))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send(upload("/media/upload", Method::POST, &alice.token, &[7u8; 2048]))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, post) = t
        .call(
            Method::POST,
            "/posts",
            Some(&alice.token),
            Some(json!({ "content": "", "mediaIds": [media["id"]] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(post["media"][0]["url"], url.as_str());

    let picture = format!("/users/{}/profile-picture", alice.id);
    let (status, _) = t.call(Method::GET, &picture, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, user) = t
        .send(upload(&picture, Method::PUT, &alice.token, b"avatar"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["profilePicture"], picture.as_str());
    let (status, _) = t.call(Method::GET, &picture, None, None).await;
    assert_eq!(status, StatusCode::OK);
}
