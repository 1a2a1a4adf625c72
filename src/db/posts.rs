use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use crate::db::models::{
    CommentAuthor, CommentBody, Post, PostBody, PostComment, PostInteractions, PostWithAuthor,
    PublicUser, Stored, User,
};
use crate::db::modify;
use crate::db::validate::{validate, validate_stored_safe, ValidationError};
use crate::store::{Collection, DocumentStore, Filter, StoreError};

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author: String,
    pub title: String,
    pub content: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostUpdate {
    pub title: Option<String>,
    /// Replaces the whole body, images included.
    pub body: Option<PostBody>,
}

/// The per-user sets on a post that toggle on repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Likes,
    Forwards,
    Bookmarks,
}

impl Toggle {
    fn set_mut(self, interactions: &mut PostInteractions) -> &mut Vec<String> {
        match self {
            Toggle::Likes => &mut interactions.likes,
            Toggle::Forwards => &mut interactions.forwards,
            Toggle::Bookmarks => &mut interactions.bookmarks,
        }
    }
}

/// Remove `user_id` if present, add it otherwise. Any duplicates already in
/// the set are dropped on the way.
fn toggle_member(set: &mut Vec<String>, user_id: &str) {
    let present = set.iter().any(|u| u == user_id);
    set.retain(|u| u != user_id);
    if !present {
        set.push(user_id.to_string());
    }

    let mut seen = HashSet::new();
    set.retain(|u| seen.insert(u.clone()));
}

#[derive(Clone)]
pub struct Posts {
    store: Arc<dyn DocumentStore>,
}

impl Posts {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, new: NewPost) -> Result<Stored<Post>, StoreError> {
        // Best effort: nothing stops the author being deleted right after
        let author_exists = self
            .store
            .find_one(Collection::Users, &Filter::ById(new.author.clone()))
            .await?
            .is_some();
        if !author_exists {
            return Err(ValidationError::field("author", "unknown user").into());
        }

        let now = Utc::now();
        let post = Post {
            author: new.author,
            title: new.title,
            body: PostBody {
                content: new.content,
                images: new.images,
            },
            interactions: PostInteractions::default(),
            created_at: now,
            updated_at: now,
        };

        let body = serde_json::to_value(&post)?;
        let post: Post = validate(body.clone())?;
        let id = uuid::Uuid::now_v7().to_string();
        self.store.insert(Collection::Posts, &id, body).await?;

        tracing::info!("Created post {} by {}", id, post.author);
        Ok(Stored::new(id, post))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Stored<Post>>, StoreError> {
        let doc = self
            .store
            .find_one(Collection::Posts, &Filter::ById(id.to_string()))
            .await?;
        Ok(doc.and_then(validate_stored_safe))
    }

    pub async fn find_all(&self) -> Result<Vec<Stored<Post>>, StoreError> {
        self.find_many(&Filter::All).await
    }

    pub async fn find_by_author(&self, author_id: &str) -> Result<Vec<Stored<Post>>, StoreError> {
        self.find_many(&Filter::Field("author", author_id.to_string()))
            .await
    }

    async fn find_many(&self, filter: &Filter) -> Result<Vec<Stored<Post>>, StoreError> {
        let docs = self.store.find_many(Collection::Posts, filter).await?;
        Ok(docs.into_iter().filter_map(validate_stored_safe).collect())
    }

    /// Resolve `ids` to public user views in one lookup.
    async fn authors(&self, ids: Vec<String>) -> Result<HashMap<String, PublicUser>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let docs = self
            .store
            .find_many(Collection::Users, &Filter::IdIn(ids))
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(validate_stored_safe::<User>)
            .map(|user| (user.id.clone(), PublicUser::from(&user)))
            .collect())
    }

    /// All posts with their authors attached. Posts whose author can't be
    /// resolved are left out.
    pub async fn find_all_with_authors(&self) -> Result<Vec<PostWithAuthor>, StoreError> {
        let posts = self.find_all().await?;

        let mut seen = HashSet::new();
        let author_ids: Vec<String> = posts
            .iter()
            .map(|p| p.doc.author.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let authors = self.authors(author_ids).await?;

        Ok(posts
            .into_iter()
            .filter_map(|post| {
                let author = authors.get(&post.doc.author)?.clone();
                Some(PostWithAuthor::new(post, author))
            })
            .collect())
    }

    /// One post with its author attached and every comment author replaced
    /// by a display snapshot where the user still exists.
    pub async fn find_by_id_with_authors(
        &self,
        id: &str,
    ) -> Result<Option<PostWithAuthor>, StoreError> {
        let Some(mut post) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let mut ids: Vec<String> = vec![post.doc.author.clone()];
        for comment in &post.doc.interactions.comments {
            let id = comment.author.id();
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        let authors = self.authors(ids).await?;

        let Some(author) = authors.get(&post.doc.author).cloned() else {
            return Ok(None);
        };

        for comment in &mut post.doc.interactions.comments {
            if let Some(user) = authors.get(comment.author.id()) {
                comment.author = CommentAuthor::Embedded {
                    id: user.record_id.clone(),
                    name: user.name.clone(),
                    is_admin: user.is_admin,
                };
            }
        }

        Ok(Some(PostWithAuthor::new(post, author)))
    }

    pub async fn update_by_id(
        &self,
        id: &str,
        update: PostUpdate,
    ) -> Result<Stored<Post>, StoreError> {
        modify(self.store.as_ref(), Collection::Posts, id, move |post: &mut Post| {
            if let Some(title) = update.title {
                post.title = title;
            }
            if let Some(body) = update.body {
                post.body = body;
            }
            post.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.store.delete(Collection::Posts, id).await
    }

    async fn toggle(
        &self,
        post_id: &str,
        user_id: &str,
        which: Toggle,
    ) -> Result<Vec<String>, StoreError> {
        let user_id = user_id.to_string();
        let post = modify(
            self.store.as_ref(),
            Collection::Posts,
            post_id,
            move |post: &mut Post| {
                toggle_member(which.set_mut(&mut post.interactions), &user_id);
                post.updated_at = Utc::now();
                Ok(())
            },
        )
        .await?;

        let mut interactions = post.doc.interactions;
        Ok(std::mem::take(which.set_mut(&mut interactions)))
    }

    /// Toggle `user_id` in the post's likes. Returns the new set.
    pub async fn increment_likes(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.toggle(post_id, user_id, Toggle::Likes).await
    }

    /// Toggle `user_id` in the post's forwards. Returns the new set.
    pub async fn increment_forwards(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.toggle(post_id, user_id, Toggle::Forwards).await
    }

    pub async fn toggle_bookmark(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.toggle(post_id, user_id, Toggle::Bookmarks).await
    }

    /// Append a comment and return the whole sequence.
    pub async fn add_comment(
        &self,
        post_id: &str,
        author_id: &str,
        content: &str,
    ) -> Result<Vec<PostComment>, StoreError> {
        if content.trim().is_empty() {
            return Err(ValidationError::field("content", "must not be empty").into());
        }

        let comment = PostComment {
            author: CommentAuthor::Reference(author_id.to_string()),
            body: CommentBody {
                content: content.to_string(),
            },
            created_at: Utc::now(),
        };

        let post = modify(
            self.store.as_ref(),
            Collection::Posts,
            post_id,
            move |post: &mut Post| {
                post.interactions.comments.push(comment);
                post.updated_at = Utc::now();
                Ok(())
            },
        )
        .await?;

        Ok(post.doc.interactions.comments)
    }
}
