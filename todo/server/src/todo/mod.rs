use crate::entities::todo;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use sea_orm::*;
use std::sync::Arc;

pub mod api;

/// A task record as stored in the `todos` table.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Todo {
    id: i32,
    title: String,
    status: String,
    details: String,
    priority: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Todo {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn priority(&self) -> &str {
        &self.priority
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl From<todo::Model> for Todo {
    fn from(model: todo::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            status: model.status,
            details: model.details,
            priority: model.priority,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// The writable fields of a todo, accepted on create and full update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoPayload {
    pub title: String,
    pub status: String,
    pub details: String,
    pub priority: String,
}

/// Error type for TodoService operations.
#[derive(Debug, thiserror::Error)]
pub enum TodoServiceError {
    /// No row exists for the requested ID.
    #[error("Todo item {0} not found")]
    TodoNotFound(i32),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Router state for the todo endpoints.
#[derive(Clone)]
pub struct TodoState {
    pub db: Arc<DatabaseConnection>,
}

pub struct TodoService<'a> {
    db: &'a DatabaseConnection,
}

/// Current time at the precision PostgreSQL stores, so a returned row compares
/// equal to the same row read back later.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Next `updated_at` for a row last touched at `previous`; always later than `previous`.
fn next_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    if now > previous {
        now
    } else {
        previous + TimeDelta::microseconds(1)
    }
}

impl TodoService<'_> {
    pub fn new(db: &DatabaseConnection) -> TodoService<'_> {
        TodoService { db }
    }

    /// Retrieves every todo, oldest first.
    ///
    /// # Returns
    ///
    /// A `Result` containing a vector of `Todo` if successful, or an error otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn get_all_todos(&self) -> Result<Vec<Todo>, TodoServiceError> {
        let todos = todo::Entity::find()
            .order_by_asc(todo::Column::Id)
            .all(self.db)
            .await?
            .into_iter()
            .map(Todo::from)
            .collect();
        Ok(todos)
    }

    /// Retrieves a todo by its ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the todo to retrieve.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Todo` if found, or `TodoNotFound` otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn get_todo_by_id(&self, id: i32) -> Result<Todo, TodoServiceError> {
        let model = todo::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(TodoServiceError::TodoNotFound(id))?;
        Ok(Todo::from(model))
    }

    /// Creates a new todo. The store assigns the ID; both timestamps are set to now.
    ///
    /// # Arguments
    ///
    /// * `payload` - Title, status, details and priority of the new todo.
    ///
    /// # Returns
    ///
    /// A `Result` containing the stored `Todo`, including its generated ID.
    #[tracing::instrument(skip(self))]
    pub async fn create_todo(&self, payload: TodoPayload) -> Result<Todo, TodoServiceError> {
        let created_at = now();
        let active_model = todo::ActiveModel {
            title: ActiveValue::Set(payload.title),
            status: ActiveValue::Set(payload.status),
            details: ActiveValue::Set(payload.details),
            priority: ActiveValue::Set(payload.priority),
            created_at: ActiveValue::Set(created_at),
            updated_at: ActiveValue::Set(created_at),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        tracing::info!("Created todo {}", created_model.id);
        Ok(Todo::from(created_model))
    }

    /// Overwrites the writable fields of a todo, keeping `created_at`.
    ///
    /// The row is locked for the duration of the transaction so concurrent
    /// updates of the same ID apply one after the other.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the todo to update.
    /// * `payload` - The new field values.
    ///
    /// # Returns
    ///
    /// A `Result` containing the updated `Todo`, or `TodoNotFound` if the ID does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn update_todo(
        &self,
        id: i32,
        payload: TodoPayload,
    ) -> Result<Todo, TodoServiceError> {
        let txn = self.db.begin().await?;
        let existing = Self::find_for_update(&txn, id).await?;

        let updated_at = next_updated_at(existing.updated_at);
        let mut active_model: todo::ActiveModel = existing.into();
        active_model.title = ActiveValue::Set(payload.title);
        active_model.status = ActiveValue::Set(payload.status);
        active_model.details = ActiveValue::Set(payload.details);
        active_model.priority = ActiveValue::Set(payload.priority);
        active_model.updated_at = ActiveValue::Set(updated_at);
        let updated_model = active_model.update(&txn).await?;

        txn.commit().await?;
        Ok(Todo::from(updated_model))
    }

    /// Changes only the status of a todo.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the todo to update.
    /// * `status` - The new status label.
    ///
    /// # Returns
    ///
    /// A `Result` containing the updated `Todo`, or `TodoNotFound` if the ID does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn update_todo_status(
        &self,
        id: i32,
        status: String,
    ) -> Result<Todo, TodoServiceError> {
        let txn = self.db.begin().await?;
        let existing = Self::find_for_update(&txn, id).await?;

        let updated_at = next_updated_at(existing.updated_at);
        let mut active_model: todo::ActiveModel = existing.into();
        active_model.status = ActiveValue::Set(status);
        active_model.updated_at = ActiveValue::Set(updated_at);
        let updated_model = active_model.update(&txn).await?;

        txn.commit().await?;
        Ok(Todo::from(updated_model))
    }

    /// Deletes a todo by its ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the todo to delete.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Todo` as it was before deletion, or `TodoNotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn delete_todo(&self, id: i32) -> Result<Todo, TodoServiceError> {
        let txn = self.db.begin().await?;
        let existing = Self::find_for_update(&txn, id).await?;

        let deleted = Todo::from(existing);
        todo::Entity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;
        tracing::info!("Deleted todo {}", id);
        Ok(deleted)
    }

    /// Loads a row with `FOR UPDATE` inside `txn`.
    async fn find_for_update(
        txn: &DatabaseTransaction,
        id: i32,
    ) -> Result<todo::Model, TodoServiceError> {
        todo::Entity::find_by_id(id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or(TodoServiceError::TodoNotFound(id))
    }
}
