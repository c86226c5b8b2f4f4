//! Typed access to one entity kind over any [`EntityStore`].

use crate::entities::{Document, Entity};
use crate::store::{EntityStore, Patch, SortSpec};
use crate::ConsoleResult;
use std::marker::PhantomData;

/// Generic CRUD client parameterised by entity kind.
#[derive(Debug)]
pub struct EntityClient<'a, T: Entity, S: EntityStore> {
    store: &'a S,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Entity, S: EntityStore> Clone for EntityClient<'_, T, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Entity, S: EntityStore> Copy for EntityClient<'_, T, S> {}

impl<'a, T: Entity, S: EntityStore> EntityClient<'a, T, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Fetch every record, optionally sorted server-side.
    pub async fn list(&self, sort: Option<&SortSpec>) -> ConsoleResult<Vec<T>> {
        self.store
            .list(T::NAME, sort)
            .await?
            .into_iter()
            .map(|doc| Ok(T::from_document(doc)?))
            .collect()
    }

    pub async fn get(&self, id: &str) -> ConsoleResult<T> {
        Ok(T::from_document(self.store.get(T::NAME, id).await?)?)
    }

    pub async fn create(&self, data: Patch) -> ConsoleResult<T> {
        Ok(T::from_document(self.store.create(T::NAME, data).await?)?)
    }

    /// Create from a typed record; its id and timestamps are ignored.
    pub async fn create_record(&self, record: &T) -> ConsoleResult<T> {
        self.create(Patch::from_record(record)?).await
    }

    pub async fn update(&self, id: &str, patch: Patch) -> ConsoleResult<T> {
        Ok(T::from_document(self.store.update(T::NAME, id, patch).await?)?)
    }

    /// Delete a record. A record that is already gone counts as deleted.
    pub async fn delete(&self, id: &str) -> ConsoleResult<()> {
        match self.store.delete(T::NAME, id).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(entity = T::NAME, id, "delete of missing record ignored");
                Ok(())
            }
            other => other,
        }
    }

    /// Fetch every record as stored, without typing.
    pub async fn list_raw(&self, sort: Option<&SortSpec>) -> ConsoleResult<Vec<Document>> {
        self.store.list(T::NAME, sort).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Food;
    use crate::store::document::DocumentStore;

    #[tokio::test]
    async fn typed_round_trip() {
        let store = DocumentStore::in_memory();
        let foods = EntityClient::<Food, _>::new(&store);

        let record = Food {
            food_name_he: "עדשים".into(),
            food_category: Some("קטניות".into()),
            ..Food::default()
        };
        let created = foods.create_record(&record).await.unwrap();
        assert!(!created.meta.id.is_unassigned());
        assert!(created.meta.created_date.is_some());

        let listed = foods.list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].food_category.as_deref(), Some("קטניות"));

        foods.delete(created.meta.id.as_str()).await.unwrap();
        assert!(foods.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeat_delete_over_rest_succeeds() {
        use crate::store::rest::tests::{serve, settings};
        use crate::store::rest::{HttpClient, RestStore};
        use axum::http::StatusCode;
        use axum::routing::delete;
        use axum::{Json, Router};

        let base = serve(Router::new().route(
            "/api/apps/app_1/entities/Food/:id",
            delete(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({ "message": "Entity not found" })),
                )
            }),
        ))
        .await;
        let store = RestStore::new(HttpClient::new(settings(base)).unwrap());
        EntityClient::<Food, _>::new(&store).delete("gone").await.unwrap();
    }
}
