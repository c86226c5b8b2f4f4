//! Current-user identity and role management.

use crate::client::EntityClient;
use crate::config::ConsoleConfig;
use crate::entities::{Entity, User};
use crate::store::document::DocumentStore;
use crate::store::rest::HttpClient;
use crate::store::{Backend, EntityStore, Patch, SortSpec};
use crate::{ConsoleError, ConsoleResult};
use nutri_types::NonEmptyText;
use reqwest::Method;
use serde_json::Value;

/// Resolves who is using the console.
#[derive(Clone, Debug)]
pub enum Identity {
    /// `GET entities/User/me` on the REST proxy.
    Rest(HttpClient),
    /// A fixed user id in the document store, created on first use.
    Document {
        store: DocumentStore,
        user_id: String,
        default_role: String,
    },
}

impl Identity {
    pub fn from_config(cfg: &ConsoleConfig, backend: &Backend) -> Self {
        match backend {
            Backend::Rest(store) => Identity::Rest(store.http().clone()),
            Backend::Document(store) => Identity::Document {
                store: store.clone(),
                user_id: cfg.console_user_id().to_string(),
                default_role: cfg.default_user_role().to_string(),
            },
        }
    }

    /// The signed-in user.
    ///
    /// In document mode a missing user record is created with the configured default role.
    pub async fn me(&self) -> ConsoleResult<User> {
        match self {
            Identity::Rest(http) => {
                let value = http
                    .send_json(Method::GET, "entities/User/me", &[], None)
                    .await?;
                Ok(serde_json::from_value(value)?)
            }
            Identity::Document {
                store,
                user_id,
                default_role,
            } => match store.get(User::NAME, user_id).await {
                Ok(doc) => Ok(User::from_document(doc)?),
                Err(e) if e.is_not_found() => {
                    tracing::info!(user_id = %user_id, role = %default_role, "creating console user");
                    let data = Patch::new()
                        .set("email", format!("{user_id}@local.console"))
                        .set("full_name", "Console User")
                        .set("role", default_role.as_str())
                        .set("created_by", user_id.as_str())
                        .set("created_by_id", user_id.as_str());
                    Ok(User::from_document(store.put(User::NAME, user_id, data)?)?)
                }
                Err(e) => Err(e),
            },
        }
    }
}

/// All users, newest first.
pub async fn list_users<S: EntityStore>(store: &S) -> ConsoleResult<Vec<User>> {
    EntityClient::<User, S>::new(store)
        .list(Some(&SortSpec::desc("created_date")))
        .await
}

/// Change a user's role. Any non-empty role text is accepted.
///
/// # Errors
///
/// `ConsoleError::InvalidInput` for a blank role; store errors otherwise.
pub async fn set_role<S: EntityStore>(store: &S, user_id: &str, role: &str) -> ConsoleResult<User> {
    let role = NonEmptyText::new(role)
        .map_err(|_| ConsoleError::InvalidInput("role must not be empty".into()))?;
    tracing::info!(user_id, role = role.as_str(), "updating user role");
    EntityClient::<User, S>::new(store)
        .update(user_id, Patch::new().set("role", Value::String(role.into_inner())))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_identity(store: &DocumentStore) -> Identity {
        Identity::Document {
            store: store.clone(),
            user_id: "local-admin".into(),
            default_role: "admin".into(),
        }
    }

    #[tokio::test]
    async fn document_identity_creates_user_once() {
        let store = DocumentStore::in_memory();
        let identity = document_identity(&store);

        let first = identity.me().await.unwrap();
        assert_eq!(first.meta.id.as_str(), "local-admin");
        assert!(first.is_admin());

        set_role(&store, "local-admin", "editor").await.unwrap();
        let second = identity.me().await.unwrap();
        assert_eq!(second.role(), "editor");
        assert_eq!(list_users(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_role_is_rejected_before_any_write() {
        let store = DocumentStore::in_memory();
        let err = set_role(&store, "nobody", "  ").await.unwrap_err();
        assert!(matches!(err, ConsoleError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn users_are_listed_newest_first() {
        let store = DocumentStore::in_memory();
        store
            .put(User::NAME, "old", Patch::new().set("email", "old@x"))
            .unwrap();
        store
            .update(
                User::NAME,
                "old",
                Patch::new().set("created_date", "2020-01-01T00:00:00.000Z"),
            )
            .await
            .unwrap();
        store
            .create(User::NAME, Patch::new().set("email", "new@x"))
            .await
            .unwrap();

        let users = list_users(&store).await.unwrap();
        assert_eq!(users[0].email, "new@x");
    }
}
