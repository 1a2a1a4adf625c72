// Demo content for a fresh install: an admin, two regular users and a few
// posts with some interactions on them.

use crate::db::{NewPost, NewUser, Posts, Users};
use crate::store::StoreError;

/// Handle, display name, password, admin flag.
const USERS: &[(&str, &str, &str, bool)] = &[
    ("admin", "Admin User", "admin123", true),
    ("regular", "Regular User", "regular123", false),
    ("another", "Another User", "another123", false),
];

/// Index into `USERS` of the author, title, content.
const POSTS: &[(usize, &str, &str)] = &[
    (
        0,
        "Welcome to the forum!",
        "This is the first post here. Say hello and tell us what you are working on.",
    ),
    (
        1,
        "Introduction thread",
        "Hi everyone! Glad to be here and looking forward to the discussions.",
    ),
    (
        2,
        "Habits that keep a codebase healthy",
        "Write readable code, test it, document the tricky parts and keep dependencies current.",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seeded {
    pub users: usize,
    pub posts: usize,
}

/// Populate an empty store. Returns `None` without touching anything when
/// users already exist.
pub async fn seed(users: &Users, posts: &Posts) -> Result<Option<Seeded>, StoreError> {
    if !users.find_all().await?.is_empty() {
        tracing::warn!("Database already has users; skipping seed");
        return Ok(None);
    }

    let mut ids = Vec::with_capacity(USERS.len());
    for (handle, name, password, is_admin) in USERS {
        let user = users
            .create(NewUser {
                handle: handle.to_string(),
                name: name.to_string(),
                email: Some(format!("{handle}@example.com")),
                password: password.to_string(),
                is_admin: *is_admin,
            })
            .await?;
        ids.push(user.id);
    }

    let mut created = 0;
    for (author, title, content) in POSTS {
        let post = posts
            .create(NewPost {
                author: ids[*author].clone(),
                title: title.to_string(),
                content: content.to_string(),
                images: vec![],
            })
            .await?;

        // Everyone but the author likes it; the next user along forwards it
        for (i, id) in ids.iter().enumerate() {
            if i != *author {
                posts.increment_likes(&post.id, id).await?;
            }
        }
        posts
            .increment_forwards(&post.id, &ids[(author + 1) % ids.len()])
            .await?;
        created += 1;
    }

    let seeded = Seeded {
        users: ids.len(),
        posts: created,
    };
    for (handle, _, password, is_admin) in USERS {
        tracing::info!("Seeded user {} (password {}, admin: {})", handle, password, is_admin);
    }
    tracing::info!("Seeded {} users and {} posts", seeded.users, seeded.posts);
    Ok(Some(seeded))
}
