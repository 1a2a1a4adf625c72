use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::validate::{Schema, ValidationError};

/// A document as it comes out of the store: the generated record id plus the
/// validated body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub doc: T,
}

impl<T> Stored<T> {
    pub fn new(id: impl Into<String>, doc: T) -> Self {
        Self {
            id: id.into(),
            doc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub salt: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Login handle, unique across users.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub credentials: Credentials,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schema for User {
    fn check(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::field("id", "must not be empty"));
        }
        if self.credentials.hash.is_empty() || self.credentials.salt.is_empty() {
            return Err(ValidationError::field("credentials", "must not be empty"));
        }
        Ok(())
    }
}

/// What the rest of the app gets to see of a user. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub record_id: String,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Stored<User>> for PublicUser {
    fn from(user: &Stored<User>) -> Self {
        Self {
            record_id: user.id.clone(),
            id: user.doc.id.clone(),
            name: user.doc.name.clone(),
            email: user.doc.email.clone(),
            is_admin: user.doc.is_admin,
            created_at: user.doc.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostBody {
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentBody {
    pub content: String,
}

/// Who wrote a comment. Stored either as a bare record id or as a display
/// snapshot; told apart by shape only, the object form is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentAuthor {
    #[serde(rename_all = "camelCase")]
    Embedded {
        id: String,
        name: String,
        is_admin: bool,
    },
    Reference(String),
}

impl CommentAuthor {
    pub fn id(&self) -> &str {
        match self {
            CommentAuthor::Embedded { id, .. } => id,
            CommentAuthor::Reference(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostComment {
    pub author: CommentAuthor,
    pub body: CommentBody,
    pub created_at: DateTime<Utc>,
}

impl Schema for PostComment {
    fn check(&self) -> Result<(), ValidationError> {
        if self.author.id().is_empty() {
            return Err(ValidationError::field("author", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostInteractions {
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub forwards: Vec<String>,
    #[serde(default)]
    pub bookmarks: Vec<String>,
    #[serde(default)]
    pub comments: Vec<PostComment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Record id of the author.
    pub author: String,
    pub title: String,
    pub body: PostBody,
    #[serde(default)]
    pub interactions: PostInteractions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schema for Post {
    fn check(&self) -> Result<(), ValidationError> {
        if self.author.is_empty() {
            return Err(ValidationError::field("author", "must not be empty"));
        }
        self.interactions
            .comments
            .iter()
            .try_for_each(|comment| comment.check())
    }
}

/// A post with its author resolved, as handed to listing pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostWithAuthor {
    #[serde(rename = "_id")]
    pub id: String,
    pub author: PublicUser,
    pub title: String,
    pub body: PostBody,
    pub interactions: PostInteractions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostWithAuthor {
    /// The author's email is dropped; posts are public.
    pub fn new(post: Stored<Post>, author: PublicUser) -> Self {
        let Stored { id, doc } = post;
        Self {
            id,
            author: PublicUser {
                email: None,
                ..author
            },
            title: doc.title,
            body: doc.body,
            interactions: doc.interactions,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}
