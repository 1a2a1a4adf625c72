use std::sync::Arc;

use agora::config::{Config, SessionKind};
use agora::routes::build_app;
use agora::state::AppState;
use agora::store::MemoryStore;
use agora::uploads::MAX_IMAGE_BYTES;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "agora-test-boundary";

struct TestApp {
    app: Router,
    uploads: TempDir,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    json: Value,
}

impl Reply {
    /// `name=value` from the first Set-Cookie header, ready to send back.
    fn cookie(&self) -> String {
        let set_cookie = self
            .headers
            .get(header::SET_COOKIE)
            .expect("No Set-Cookie header")
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }
}

/// How a test client proves who it is.
#[derive(Clone)]
enum Auth {
    None,
    Cookie(String),
    Bearer(String),
}

impl TestApp {
    fn new(strategy: SessionKind) -> Self {
        let uploads = TempDir::new().unwrap();

        let mut config = Config::default();
        config.storage.path = Some(uploads.path().to_path_buf());
        config.auth.strategy = strategy;
        config.auth.secret = Some("test-secret".into());
        config.auth.bcrypt_cost = 4;
        config.auth.admin_handles = vec!["root".into()];

        let state = AppState::new(config, Arc::new(MemoryStore::new()));
        Self {
            app: build_app(state),
            uploads,
        }
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            json,
        }
    }

    fn request(method: Method, uri: &str, auth: &Auth) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        match auth {
            Auth::None => builder,
            Auth::Cookie(cookie) => builder.header(header::COOKIE, cookie),
            Auth::Bearer(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
        }
    }

    async fn json(&self, method: Method, uri: &str, auth: &Auth, body: Value) -> Reply {
        let request = Self::request(method, uri, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn raw(&self, method: Method, uri: &str, content_type: &str, body: &str) -> Reply {
        let request = Self::request(method, uri, &Auth::None)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn empty(&self, method: Method, uri: &str, auth: &Auth) -> Reply {
        let request = Self::request(method, uri, auth)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn multipart(
        &self,
        method: Method,
        uri: &str,
        auth: &Auth,
        fields: &[(&str, &str)],
        image: Option<(&str, &str, &[u8])>,
    ) -> Reply {
        let request = Self::request(method, uri, auth)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, image)))
            .unwrap();
        self.send(request).await
    }

    async fn signup(&self, username: &str) -> Reply {
        self.json(
            Method::POST,
            "/auth/signup",
            &Auth::None,
            json!({
                "username": username,
                "email": format!("{username}@x.com"),
                "password": "pw123456",
            }),
        )
        .await
    }

    /// Sign up and return a cookie carrier for the new session.
    async fn signed_in(&self, username: &str) -> Auth {
        let reply = self.signup(username).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.json);
        Auth::Cookie(reply.cookie())
    }

    async fn create_post(&self, auth: &Auth, title: &str) -> String {
        let reply = self
            .multipart(
                Method::POST,
                "/posts",
                auth,
                &[("title", title), ("content", "Some content")],
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.json);
        reply.json["post"]["_id"].as_str().unwrap().to_string()
    }
}

fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn duplicate_signup_is_rejected() {
    let app = TestApp::new(SessionKind::Cookie);

    let first = app.signup("alice").await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.json["success"], true);
    assert_eq!(first.json["user"]["id"], "alice");
    assert!(first.json["user"].get("credentials").is_none());

    let second = app.signup("alice").await;
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.json, json!({ "error": "User already exists" }));
}

#[tokio::test]
async fn signup_validates_input() {
    let app = TestApp::new(SessionKind::Cookie);

    let reply = app
        .json(
            Method::POST,
            "/auth/signup",
            &Auth::None,
            json!({ "username": "alice", "password": "pw123456" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json["error"],
        "Username, email, and password are required"
    );

    let reply = app
        .json(
            Method::POST,
            "/auth/signup",
            &Auth::None,
            json!({ "username": "alice", "email": "a@x.com", "password": "short" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json["error"],
        "Password must be at least 8 characters long"
    );
}

#[tokio::test]
async fn login_sets_a_working_session_cookie() {
    let app = TestApp::new(SessionKind::Cookie);
    app.signup("alice").await;

    let bad = app
        .json(
            Method::POST,
            "/auth/login",
            &Auth::None,
            json!({ "username": "alice", "password": "not-the-password" }),
        )
        .await;
    assert_eq!(bad.status, StatusCode::UNAUTHORIZED);
    assert_eq!(bad.json["error"], "Invalid username or password");

    let good = app
        .json(
            Method::POST,
            "/auth/login",
            &Auth::None,
            json!({ "username": "alice", "password": "pw123456" }),
        )
        .await;
    assert_eq!(good.status, StatusCode::OK);
    let set_cookie = good.headers[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(good.json.get("token").is_none());

    let auth = Auth::Cookie(good.cookie());
    let me = app.empty(Method::GET, "/auth/me", &auth).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["user"]["id"], "alice");
    assert_eq!(me.json["user"]["email"], "alice@x.com");
}

#[tokio::test]
async fn tampered_cookie_is_not_logged_in() {
    let app = TestApp::new(SessionKind::Cookie);
    let Auth::Cookie(cookie) = app.signed_in("alice").await else {
        unreachable!()
    };

    let tampered = format!("{cookie}x");
    let reply = app
        .empty(Method::GET, "/auth/me", &Auth::Cookie(tampered))
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.json["error"], "You must be logged in");

    let reply = app.empty(Method::GET, "/auth/me", &Auth::None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_clears_the_cookie() {
    let app = TestApp::new(SessionKind::Cookie);
    let auth = app.signed_in("alice").await;

    let reply = app.empty(Method::POST, "/auth/logout", &auth).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json, json!({ "success": true }));
    let set_cookie = reply.headers[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("session=;"));
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn profile_updates_display_name() {
    let app = TestApp::new(SessionKind::Cookie);
    let auth = app.signed_in("alice").await;

    let reply = app
        .json(
            Method::POST,
            "/auth/profile",
            &auth,
            json!({ "username": "Alice Liddell" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json["name"], "Alice Liddell");

    let reply = app
        .json(Method::POST, "/auth/profile", &auth, json!({ "username": "  " }))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn post_requires_title_and_content() {
    let app = TestApp::new(SessionKind::Cookie);
    let auth = app.signed_in("alice").await;

    let reply = app
        .multipart(
            Method::POST,
            "/posts",
            &auth,
            &[("title", ""), ("content", "hello")],
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["error"], "Title and content are required");

    let reply = app.empty(Method::GET, "/posts", &Auth::None).await;
    assert_eq!(reply.json["posts"], json!([]));
}

#[tokio::test]
async fn creating_a_post_needs_a_session() {
    let app = TestApp::new(SessionKind::Cookie);
    let reply = app
        .multipart(
            Method::POST,
            "/posts",
            &Auth::None,
            &[("title", "t"), ("content", "c")],
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn liking_a_missing_post_is_not_found() {
    let app = TestApp::new(SessionKind::Cookie);
    let auth = app.signed_in("alice").await;

    let reply = app
        .empty(Method::POST, "/posts/does-not-exist/like", &auth)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json, json!({ "error": "Post not found" }));
}

#[tokio::test]
async fn like_toggles_and_listing_is_newest_first() {
    let app = TestApp::new(SessionKind::Cookie);
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;

    let first = app.create_post(&alice, "first").await;
    app.create_post(&alice, "second").await;

    let reply = app
        .empty(Method::POST, &format!("/posts/{first}/like"), &bob)
        .await;
    assert_eq!(reply.json["success"], true);
    assert_eq!(reply.json["likes"].as_array().unwrap().len(), 1);

    let reply = app
        .empty(Method::POST, &format!("/posts/{first}/like"), &bob)
        .await;
    assert_eq!(reply.json["likes"], json!([]));

    let reply = app
        .empty(Method::POST, &format!("/posts/{first}/forward"), &bob)
        .await;
    assert_eq!(reply.json["forwards"].as_array().unwrap().len(), 1);

    let reply = app
        .empty(Method::POST, &format!("/posts/{first}/bookmark"), &bob)
        .await;
    assert_eq!(reply.json["bookmarks"].as_array().unwrap().len(), 1);

    let list = app.empty(Method::GET, "/posts", &Auth::None).await;
    let titles: Vec<&str> = list.json["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["second", "first"]);
    assert_eq!(list.json["posts"][0]["author"]["id"], "alice");
    assert!(list.json["posts"][0]["author"].get("email").is_none());

    let mine = app
        .empty(Method::GET, "/users/alice/posts", &Auth::None)
        .await;
    assert_eq!(mine.json["posts"].as_array().unwrap().len(), 2);
    let missing = app
        .empty(Method::GET, "/users/nobody/posts", &Auth::None)
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_the_owner_edits_a_post() {
    let app = TestApp::new(SessionKind::Cookie);
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;
    let post = app.create_post(&alice, "mine").await;

    let reply = app
        .multipart(
            Method::PUT,
            &format!("/posts/{post}"),
            &bob,
            &[("title", "hijacked"), ("content", "x")],
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.json["error"], "You can only edit your own posts");

    let reply = app
        .multipart(
            Method::PUT,
            &format!("/posts/{post}"),
            &alice,
            &[("title", "edited"), ("content", "new content")],
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json["post"]["title"], "edited");
    assert_eq!(reply.json["post"]["body"]["content"], "new content");

    let reply = app
        .empty(Method::DELETE, &format!("/posts/{post}"), &bob)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.json["error"], "You can only delete your own posts");

    let reply = app
        .empty(Method::DELETE, &format!("/posts/{post}"), &alice)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = app
        .empty(Method::GET, &format!("/posts/{post}"), &Auth::None)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn comments_append_with_author_snapshots() {
    let app = TestApp::new(SessionKind::Cookie);
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;
    let post = app.create_post(&alice, "thread").await;

    let reply = app
        .json(
            Method::POST,
            &format!("/posts/{post}/comments"),
            &bob,
            json!({ "content": "  " }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["error"], "Comment content is required");

    for text in ["one", "two"] {
        let reply = app
            .json(
                Method::POST,
                &format!("/posts/{post}/comments"),
                &bob,
                json!({ "content": text }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let view = app
        .empty(Method::GET, &format!("/posts/{post}"), &Auth::None)
        .await;
    let comments = view.json["post"]["interactions"]["comments"]
        .as_array()
        .unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["body"]["content"], "one");
    assert_eq!(comments[1]["body"]["content"], "two");
    assert_eq!(comments[0]["author"]["name"], "bob");
}

#[tokio::test]
async fn image_upload_is_stored_and_served() {
    let app = TestApp::new(SessionKind::Cookie);
    let alice = app.signed_in("alice").await;

    let reply = app
        .multipart(
            Method::POST,
            "/posts",
            &alice,
            &[("title", "pic"), ("content", "look")],
            Some(("cat.png", "image/png", &b"\x89PNG fake"[..])),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.json);
    let url = reply.json["post"]["body"]["images"][0]
        .as_str()
        .unwrap()
        .to_string();
    assert!(url.starts_with("/uploads/"));
    assert!(url.ends_with(".png"));
    assert_eq!(std::fs::read_dir(app.uploads.path()).unwrap().count(), 1);

    let served = app.empty(Method::GET, &url, &Auth::None).await;
    assert_eq!(served.status, StatusCode::OK);

    let reply = app
        .multipart(
            Method::POST,
            "/posts",
            &alice,
            &[("title", "doc"), ("content", "x")],
            Some(("notes.txt", "text/plain", &b"hello"[..])),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_need_an_admin() {
    let app = TestApp::new(SessionKind::Cookie);
    let root = app.signed_in("root").await;
    let alice = app.signed_in("alice").await;
    let post = app.create_post(&alice, "spam").await;

    let reply = app.empty(Method::GET, "/admin/users", &alice).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = app.empty(Method::GET, "/admin/users", &root).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json["users"].as_array().unwrap().len(), 2);

    let reply = app
        .empty(Method::DELETE, &format!("/admin/posts/{post}"), &root)
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = app
        .empty(Method::DELETE, &format!("/admin/posts/{post}"), &root)
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_can_delete_any_post() {
    let app = TestApp::new(SessionKind::Cookie);
    let root = app.signed_in("root").await;
    let alice = app.signed_in("alice").await;
    let post = app.create_post(&alice, "hers").await;

    let reply = app
        .empty(Method::DELETE, &format!("/posts/{post}"), &root)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn bearer_strategy_returns_a_token() {
    let app = TestApp::new(SessionKind::Bearer);

    let reply = app.signup("alice").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.headers.get(header::SET_COOKIE).is_none());
    let token = reply.json["token"].as_str().unwrap().to_string();
    assert_eq!(token.split('.').count(), 3);

    let me = app
        .empty(Method::GET, "/auth/me", &Auth::Bearer(token.clone()))
        .await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["user"]["id"], "alice");

    let forged = format!("{token}x");
    let me = app
        .empty(Method::GET, "/auth/me", &Auth::Bearer(forged))
        .await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn managed_strategy_uses_the_session_layer() {
    let app = TestApp::new(SessionKind::Managed);

    let reply = app.signup("alice").await;
    assert_eq!(reply.status, StatusCode::OK);
    let auth = Auth::Cookie(reply.cookie());

    let me = app.empty(Method::GET, "/auth/me", &auth).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["user"]["id"], "alice");

    let reply = app.empty(Method::POST, "/auth/logout", &auth).await;
    assert_eq!(reply.status, StatusCode::OK);

    let me = app.empty(Method::GET, "/auth/me", &auth).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let app = TestApp::new(SessionKind::Cookie);

    let reply = app
        .raw(Method::POST, "/auth/signup", "text/plain", "username=alice")
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json["error"].is_string(), "{}", reply.json);

    let reply = app
        .raw(Method::POST, "/auth/signup", "application/json", "{not json")
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json["error"].is_string(), "{}", reply.json);

    let reply = app
        .raw(Method::POST, "/auth/login", "application/json", "[1, 2]")
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json["error"].is_string(), "{}", reply.json);

    // Posts expect multipart
    let alice = app.signed_in("alice").await;
    let request = TestApp::request(Method::POST, "/posts", &alice)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"title":"t","content":"c"}"#))
        .unwrap();
    let reply = app.send(request).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json["error"].is_string(), "{}", reply.json);
}

#[tokio::test]
async fn oversized_image_reports_the_size_limit() {
    let app = TestApp::new(SessionKind::Cookie);
    let alice = app.signed_in("alice").await;

    let just_over = vec![0u8; MAX_IMAGE_BYTES + 1];
    let reply = app
        .multipart(
            Method::POST,
            "/posts",
            &alice,
            &[("title", "big"), ("content", "too big")],
            Some(("big.png", "image/png", &just_over)),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json, json!({ "error": "Image must be 5MB or smaller" }));

    // Past the request body cap the stream is cut off, same message
    let far_over = vec![0u8; 2 * MAX_IMAGE_BYTES + 1];
    let reply = app
        .multipart(
            Method::POST,
            "/posts",
            &alice,
            &[("title", "huge"), ("content", "way too big")],
            Some(("huge.png", "image/png", &far_over)),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json, json!({ "error": "Image must be 5MB or smaller" }));

    assert_eq!(std::fs::read_dir(app.uploads.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unauthenticated_requests_get_the_login_message() {
    for strategy in [SessionKind::Cookie, SessionKind::Bearer, SessionKind::Managed] {
        let app = TestApp::new(strategy);
        for auth in [
            Auth::None,
            Auth::Cookie("session=garbage".into()),
            Auth::Bearer("not.a.token".into()),
        ] {
            let reply = app.empty(Method::GET, "/auth/me", &auth).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
            assert_eq!(reply.json, json!({ "error": "You must be logged in" }));
        }
    }
}

#[tokio::test]
async fn me_returns_the_signed_in_profile() {
    let app = TestApp::new(SessionKind::Cookie);
    let alice = app.signed_in("alice").await;

    let me = app.empty(Method::GET, "/auth/me", &alice).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json["user"]["id"], "alice");
    assert_eq!(me.json["user"]["email"], "alice@x.com");
    assert_eq!(me.json["user"]["isAdmin"], false);
    assert!(me.json["user"].get("credentials").is_none());
}
