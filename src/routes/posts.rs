use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::{PostBody, PostWithAuthor, PublicUser};
use crate::db::{NewPost, PostUpdate};
use crate::error::{AppError, AppResult};
use crate::extractors::{AppJson, AppPath, CurrentUser};
use crate::state::AppState;
use crate::uploads::{self, ImageUpload, MAX_IMAGE_BYTES};

// --- Forms ---

/// Fields of the create/edit multipart form.
#[derive(Debug, Default)]
struct PostForm {
    title: String,
    content: String,
    image: Option<ImageUpload>,
}

impl PostForm {
    async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = PostForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "title" => form.title = field.text().await?.trim().to_string(),
                "content" => form.content = field.text().await?.trim().to_string(),
                "image" => {
                    let file_name = field.file_name().unwrap_or("").to_string();
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    // Browsers send an empty part when no file was picked
                    if !file_name.is_empty() || !bytes.is_empty() {
                        form.image = Some(ImageUpload {
                            file_name,
                            content_type,
                            bytes,
                        });
                    }
                }
                _ => {
                    tracing::debug!("Ignoring unknown form field {}", name);
                }
            }
        }

        if form.title.is_empty() || form.content.is_empty() {
            return Err(AppError::validation("Title and content are required"));
        }
        if let Some(image) = &form.image {
            uploads::validate_image(image)?;
        }
        Ok(form)
    }
}

impl FromRequest<AppState> for PostForm {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let multipart = Multipart::from_request(req, state).await?;
        Self::read(multipart).await
    }
}

#[derive(Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub content: String,
}

// --- Router ---

/// Request body cap for this router; twice the image limit.
pub const BODY_LIMIT: usize = 2 * MAX_IMAGE_BYTES;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/{id}",
            get(show_post).put(update_post).delete(delete_post),
        )
        .route("/posts/{id}/like", post(like_post))
        .route("/posts/{id}/forward", post(forward_post))
        .route("/posts/{id}/bookmark", post(bookmark_post))
        .route("/posts/{id}/comments", post(create_comment))
        .route("/users/{handle}/posts", get(user_posts))
        // Oversized images must still reach validate_image for its message
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
}

// --- Handlers ---

async fn list_posts(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let mut posts = state.posts.find_all_with_authors().await?;
    posts.reverse();
    Ok(Json(json!({ "success": true, "posts": posts })))
}

async fn show_post(
    State(state): State<AppState>,
    AppPath(id): AppPath<String>,
) -> AppResult<Json<Value>> {
    let post = state
        .posts
        .find_by_id_with_authors(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;
    Ok(Json(json!({ "success": true, "post": post })))
}

async fn user_posts(
    State(state): State<AppState>,
    AppPath(handle): AppPath<String>,
) -> AppResult<Json<Value>> {
    let user = state
        .users
        .find_by_handle(&handle)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let author = PublicUser::from(&user);

    let posts: Vec<PostWithAuthor> = state
        .posts
        .find_by_author(&user.id)
        .await?
        .into_iter()
        .rev()
        .map(|post| PostWithAuthor::new(post, author.clone()))
        .collect();

    Ok(Json(json!({ "success": true, "posts": posts })))
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    form: PostForm,
) -> AppResult<Json<Value>> {
    let PostForm {
        title,
        content,
        image,
    } = form;
    let author = user.id.clone();
    let posts = &state.posts;
    let post = uploads::with_saved_image(&state.uploads_dir, image.as_ref(), |url| async move {
        let post = posts
            .create(NewPost {
                author,
                title,
                content,
                images: url.into_iter().collect(),
            })
            .await?;
        Ok(post)
    })
    .await?;

    let post = PostWithAuthor::new(post, PublicUser::from(&user));
    Ok(Json(json!({ "success": true, "post": post })))
}

async fn update_post(
    State(state): State<AppState>,
    user: CurrentUser,
    AppPath(id): AppPath<String>,
    form: PostForm,
) -> AppResult<Json<Value>> {
    let existing = state
        .posts
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;
    if existing.doc.author != user.id {
        return Err(AppError::forbidden("You can only edit your own posts"));
    }

    let PostForm {
        title,
        content,
        image,
    } = form;
    let replaced = image.is_some();
    let (posts, post_id, old_images) = (&state.posts, &id, &existing.doc.body.images);
    let updated = uploads::with_saved_image(&state.uploads_dir, image.as_ref(), |url| async move {
        // A new image replaces the old ones; otherwise they stay
        let images = match url {
            Some(url) => vec![url],
            None => old_images.clone(),
        };
        posts
            .update_by_id(
                post_id,
                PostUpdate {
                    title: Some(title),
                    body: Some(PostBody { content, images }),
                },
            )
            .await
            .map_err(AppError::for_post)
    })
    .await?;

    if replaced {
        uploads::remove_images(&state.uploads_dir, &existing.doc.body.images).await;
    }

    tracing::info!("Post {} edited by {}", id, user.handle);
    let post = PostWithAuthor::new(updated, PublicUser::from(&user));
    Ok(Json(json!({ "success": true, "post": post })))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    AppPath(id): AppPath<String>,
) -> AppResult<Json<Value>> {
    let post = state
        .posts
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;
    if post.doc.author != user.id && !user.is_admin {
        return Err(AppError::forbidden("You can only delete your own posts"));
    }

    remove_post(&state, &id, &post.doc.body.images).await?;
    tracing::info!("Post {} deleted by {}", id, user.handle);
    Ok(Json(json!({ "success": true })))
}

/// Delete the post record, then its images.
pub(crate) async fn remove_post(state: &AppState, id: &str, images: &[String]) -> AppResult<()> {
    if !state.posts.delete_by_id(id).await? {
        return Err(AppError::not_found("Post not found"));
    }
    uploads::remove_images(&state.uploads_dir, images).await;
    Ok(())
}

async fn like_post(
    State(state): State<AppState>,
    user: CurrentUser,
    AppPath(id): AppPath<String>,
) -> AppResult<Json<Value>> {
    let likes = state
        .posts
        .increment_likes(&id, &user.id)
        .await
        .map_err(AppError::for_post)?;
    Ok(Json(json!({ "success": true, "likes": likes })))
}

async fn forward_post(
    State(state): State<AppState>,
    user: CurrentUser,
    AppPath(id): AppPath<String>,
) -> AppResult<Json<Value>> {
    let forwards = state
        .posts
        .increment_forwards(&id, &user.id)
        .await
        .map_err(AppError::for_post)?;
    Ok(Json(json!({ "success": true, "forwards": forwards })))
}

async fn bookmark_post(
    State(state): State<AppState>,
    user: CurrentUser,
    AppPath(id): AppPath<String>,
) -> AppResult<Json<Value>> {
    let bookmarks = state
        .posts
        .toggle_bookmark(&id, &user.id)
        .await
        .map_err(AppError::for_post)?;
    Ok(Json(json!({ "success": true, "bookmarks": bookmarks })))
}

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    AppPath(id): AppPath<String>,
    AppJson(form): AppJson<CommentForm>,
) -> AppResult<Json<Value>> {
    let content = form.content.trim();
    if content.is_empty() {
        return Err(AppError::validation("Comment content is required"));
    }

    let comments = state
        .posts
        .add_comment(&id, &user.id, content)
        .await
        .map_err(AppError::for_post)?;
    Ok(Json(json!({ "success": true, "comments": comments })))
}
