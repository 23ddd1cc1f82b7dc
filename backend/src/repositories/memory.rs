//! In-process store that announces every mutation on a [`ModelEventBus`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::repositories::events::{
    AuditModel, LifecycleEvent, LifecycleKind, ModelEventBus, RelationAction,
};
use crate::repositories::repository::Repository;

type RelationKey = (String, String);

pub struct MemoryRepository<T> {
    records: RwLock<Vec<T>>,
    relations: RwLock<HashMap<RelationKey, BTreeSet<String>>>,
    sequence: AtomicU64,
    bus: ModelEventBus,
}

impl<T: AuditModel> MemoryRepository<T> {
    pub fn new(bus: ModelEventBus) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            relations: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(1),
            bus,
        }
    }

    fn publish(&self, kind: LifecycleKind) {
        self.bus.publish(&LifecycleEvent::new::<T>(kind));
    }

    fn require_id(item: &T) -> Result<String, AppError> {
        item.instance_id().ok_or_else(|| {
            AppError::BadRequest(format!("{} has no identifier", T::model_name()))
        })
    }

    fn not_found(id: &str) -> AppError {
        AppError::NotFound(format!("{} {} not found", T::model_name(), id))
    }

    fn position(records: &[T], id: &str) -> Option<usize> {
        records
            .iter()
            .position(|record| record.instance_id().as_deref() == Some(id))
    }

    /// Creates `item` if its id is unknown, otherwise updates it.
    pub async fn save(&self, item: T) -> Result<T, AppError> {
        let exists = match item.instance_id() {
            Some(id) => Self::position(&self.records.read().await, &id).is_some(),
            None => false,
        };
        if exists {
            self.update(item).await
        } else {
            self.create(item).await
        }
    }

    /// Inserts all items and announces them as one batch.
    pub async fn bulk_create(&self, items: Vec<T>) -> Result<Vec<T>, AppError> {
        if items.is_empty() {
            return Ok(items);
        }
        let mut created = Vec::with_capacity(items.len());
        {
            let mut records = self.records.write().await;
            let mut batch_ids = HashSet::with_capacity(items.len());
            for mut item in items {
                item.assign_id(self.sequence.fetch_add(1, Ordering::Relaxed));
                let id = Self::require_id(&item)?;
                if Self::position(&records, &id).is_some() || !batch_ids.insert(id.clone()) {
                    return Err(AppError::Conflict(format!(
                        "{} {} already exists",
                        T::model_name(),
                        id
                    )));
                }
                created.push(item);
            }
            // Nothing is stored unless the whole batch is valid.
            records.extend(created.iter().cloned());
        }
        self.publish(LifecycleKind::BulkCreate(
            created.iter().map(AuditModel::snapshot).collect(),
        ));
        Ok(created)
    }

    /// Replaces existing records in one write; `fields` names the columns the
    /// caller changed.
    pub async fn bulk_update(&self, items: Vec<T>, fields: &[&str]) -> Result<Vec<T>, AppError> {
        if items.is_empty() {
            return Ok(items);
        }
        {
            let mut records = self.records.write().await;
            let mut positions = Vec::with_capacity(items.len());
            for item in &items {
                let id = Self::require_id(item)?;
                positions.push(Self::position(&records, &id).ok_or_else(|| Self::not_found(&id))?);
            }
            for (position, item) in positions.into_iter().zip(items.iter()) {
                records[position] = item.clone();
            }
        }
        self.publish(LifecycleKind::BulkUpdate {
            instances: items.iter().map(AuditModel::snapshot).collect(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        });
        Ok(items)
    }

    pub async fn add_related(
        &self,
        id: &str,
        field: &str,
        related_ids: Vec<String>,
    ) -> Result<(), AppError> {
        let instance = self.find_by_id(id).await?;
        self.publish(relation(&instance, field, RelationAction::PreAdd, related_ids.clone()));
        let added: Vec<String> = {
            let mut relations = self.relations.write().await;
            let set = relations
                .entry((id.to_string(), field.to_string()))
                .or_default();
            related_ids
                .into_iter()
                .filter(|related| set.insert(related.clone()))
                .collect()
        };
        self.publish(relation(&instance, field, RelationAction::PostAdd, added));
        Ok(())
    }

    pub async fn remove_related(
        &self,
        id: &str,
        field: &str,
        related_ids: Vec<String>,
    ) -> Result<(), AppError> {
        let instance = self.find_by_id(id).await?;
        self.publish(relation(&instance, field, RelationAction::PreRemove, related_ids.clone()));
        let removed: Vec<String> = {
            let mut relations = self.relations.write().await;
            match relations.get_mut(&(id.to_string(), field.to_string())) {
                Some(set) => related_ids
                    .into_iter()
                    .filter(|related| set.remove(related))
                    .collect(),
                None => Vec::new(),
            }
        };
        self.publish(relation(&instance, field, RelationAction::PostRemove, removed));
        Ok(())
    }

    pub async fn clear_related(&self, id: &str, field: &str) -> Result<(), AppError> {
        let instance = self.find_by_id(id).await?;
        self.publish(relation(&instance, field, RelationAction::PreClear, Vec::new()));
        self.relations
            .write()
            .await
            .remove(&(id.to_string(), field.to_string()));
        self.publish(relation(&instance, field, RelationAction::PostClear, Vec::new()));
        Ok(())
    }

    pub async fn related(&self, id: &str, field: &str) -> Vec<String> {
        self.relations
            .read()
            .await
            .get(&(id.to_string(), field.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn relation<T: AuditModel>(
    instance: &T,
    field: &str,
    action: RelationAction,
    related_ids: Vec<String>,
) -> LifecycleKind {
    LifecycleKind::RelationChanged {
        instance: instance.snapshot(),
        field: field.to_string(),
        action,
        related_ids,
    }
}

impl<T: AuditModel> Repository<T> for MemoryRepository<T> {
    async fn find_all(&self) -> Result<Vec<T>, AppError> {
        Ok(self.records.read().await.clone())
    }

    async fn find_by_id(&self, id: &str) -> Result<T, AppError> {
        let records = self.records.read().await;
        Self::position(&records, id)
            .map(|position| records[position].clone())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn create(&self, mut item: T) -> Result<T, AppError> {
        if let Some(id) = item.instance_id() {
            if Self::position(&self.records.read().await, &id).is_some() {
                return Err(AppError::Conflict(format!(
                    "{} {} already exists",
                    T::model_name(),
                    id
                )));
            }
        }
        self.publish(LifecycleKind::PreCreate(item.snapshot()));
        item.assign_id(self.sequence.fetch_add(1, Ordering::Relaxed));
        let id = Self::require_id(&item)?;
        {
            let mut records = self.records.write().await;
            if Self::position(&records, &id).is_some() {
                return Err(AppError::Conflict(format!(
                    "{} {} already exists",
                    T::model_name(),
                    id
                )));
            }
            records.push(item.clone());
        }
        self.publish(LifecycleKind::PostCreate(item.snapshot()));
        Ok(item)
    }

    async fn update(&self, item: T) -> Result<T, AppError> {
        let id = Self::require_id(&item)?;
        if Self::position(&self.records.read().await, &id).is_none() {
            return Err(Self::not_found(&id));
        }
        self.publish(LifecycleKind::PreUpdate(item.snapshot()));
        {
            let mut records = self.records.write().await;
            let position = Self::position(&records, &id).ok_or_else(|| Self::not_found(&id))?;
            records[position] = item.clone();
        }
        self.publish(LifecycleKind::PostUpdate(item.snapshot()));
        Ok(item)
    }

    async fn delete(&self, id: &str) -> Result<T, AppError> {
        let existing = self.find_by_id(id).await?;
        self.publish(LifecycleKind::PreDelete(existing.snapshot()));
        let removed = {
            let mut records = self.records.write().await;
            let position = Self::position(&records, id).ok_or_else(|| Self::not_found(id))?;
            records.remove(position)
        };
        self.relations
            .write()
            .await
            .retain(|(owner, _), _| owner != id);
        self.publish(LifecycleKind::PostDelete(removed.snapshot()));
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::author::Author;
    use crate::models::book::Book;
    use crate::repositories::events::{LifecycleEvent, ModelListener};
    use crate::types::AuthorId;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LifecycleKind>>);

    impl Recorder {
        fn kinds(&self) -> Vec<LifecycleKind> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ModelListener for Recorder {
        fn on_event(&self, event: &LifecycleEvent) {
            self.0.lock().unwrap().push(event.kind.clone());
        }
    }

    fn repository<T: AuditModel>() -> (MemoryRepository<T>, Arc<Recorder>) {
        let bus = ModelEventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone());
        (MemoryRepository::new(bus), recorder)
    }

    #[tokio::test]
    async fn create_publishes_pre_and_post_events() {
        let (books, recorder) = repository::<Book>();
        let book = books
            .create(Book::new("Notes".to_string(), AuthorId::new(), false))
            .await
            .expect("create");
        assert_eq!(book.id, Some(1));

        let kinds = recorder.kinds();
        assert_eq!(kinds.len(), 2);
        assert!(matches!(&kinds[0], LifecycleKind::PreCreate(snapshot) if snapshot.id.is_none()));
        assert!(
            matches!(&kinds[1], LifecycleKind::PostCreate(snapshot) if snapshot.id.as_deref() == Some("1"))
        );
    }

    #[tokio::test]
    async fn save_updates_known_records() {
        let (authors, recorder) = repository::<Author>();
        let mut author = authors
            .save(Author::new("Ada".to_string(), 1))
            .await
            .expect("create");
        author.experience = 2;
        authors.save(author.clone()).await.expect("update");

        assert_eq!(authors.len().await, 1);
        assert_eq!(
            authors
                .find_by_id(&author.id.to_string())
                .await
                .expect("find")
                .experience,
            2
        );
        let kinds = recorder.kinds();
        assert!(matches!(kinds[2], LifecycleKind::PreUpdate(_)));
        assert!(matches!(kinds[3], LifecycleKind::PostUpdate(_)));
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict_without_events() {
        let (authors, recorder) = repository::<Author>();
        let author = authors
            .create(Author::new("Ada".to_string(), 1))
            .await
            .expect("create");
        let err = authors.create(author).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(recorder.kinds().len(), 2);
    }

    #[tokio::test]
    async fn conflicting_bulk_create_stores_nothing() {
        let (authors, recorder) = repository::<Author>();
        let existing = authors
            .create(Author::new("Ada".to_string(), 1))
            .await
            .expect("create");

        let err = authors
            .bulk_create(vec![Author::new("Alan".to_string(), 2), existing.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let repeated = Author::new("Grace".to_string(), 3);
        let err = authors
            .bulk_create(vec![repeated.clone(), repeated])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        assert_eq!(authors.len().await, 1);
        assert_eq!(recorder.kinds().len(), 2);
    }

    #[tokio::test]
    async fn delete_missing_record_is_not_found() {
        let (authors, recorder) = repository::<Author>();
        let err = authors.delete("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(recorder.kinds().is_empty());
    }

    #[tokio::test]
    async fn bulk_operations_publish_one_event_each() {
        let (books, recorder) = repository::<Book>();
        let author = AuthorId::new();
        let mut created = books
            .bulk_create(vec![
                Book::new("One".to_string(), author, false),
                Book::new("Two".to_string(), author, false),
            ])
            .await
            .expect("bulk create");
        for book in created.iter_mut() {
            book.published = true;
        }
        books
            .bulk_update(created, &["published"])
            .await
            .expect("bulk update");
        books.bulk_create(Vec::new()).await.expect("empty");

        let kinds = recorder.kinds();
        assert_eq!(kinds.len(), 2);
        assert!(matches!(&kinds[0], LifecycleKind::BulkCreate(items) if items.len() == 2));
        assert!(matches!(
            &kinds[1],
            LifecycleKind::BulkUpdate { instances, fields } if instances.len() == 2 && fields == &["published"]
        ));
        assert!(books.find_all().await.expect("all").iter().all(|book| book.published));
    }

    #[tokio::test]
    async fn relations_report_only_effective_changes() {
        let (books, recorder) = repository::<Book>();
        let book = books
            .create(Book::new("Notes".to_string(), AuthorId::new(), false))
            .await
            .expect("create");
        let id = book.id.expect("id").to_string();

        books
            .add_related(&id, "co_authors", vec!["a".to_string(), "b".to_string()])
            .await
            .expect("add");
        books
            .add_related(&id, "co_authors", vec!["b".to_string()])
            .await
            .expect("add again");
        books
            .remove_related(&id, "co_authors", vec!["a".to_string()])
            .await
            .expect("remove");
        assert_eq!(books.related(&id, "co_authors").await, vec!["b".to_string()]);
        books.clear_related(&id, "co_authors").await.expect("clear");
        assert!(books.related(&id, "co_authors").await.is_empty());

        let post: Vec<(RelationAction, Vec<String>)> = recorder
            .kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                LifecycleKind::RelationChanged {
                    action,
                    related_ids,
                    ..
                } if action.is_post() => Some((action, related_ids)),
                _ => None,
            })
            .collect();
        assert_eq!(
            post,
            vec![
                (RelationAction::PostAdd, vec!["a".to_string(), "b".to_string()]),
                (RelationAction::PostAdd, Vec::new()),
                (RelationAction::PostRemove, vec!["a".to_string()]),
                (RelationAction::PostClear, Vec::new()),
            ]
        );
    }
}
