use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionSession, TransactionTrait, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use crate::types::{Patch, TaskStatus};
use crate::{
    entities::task,
    retry::{BusyError, retry_on_busy},
};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_SIZE: u64 = 10;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Task not found")]
    TaskNotFound,
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl BusyError for TaskError {
    fn is_busy(&self) -> bool {
        matches!(self, TaskError::Database(err) if err.is_busy())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<task::Model> for Task {
    fn from(model: task::Model) -> Self {
        Self {
            id: model.uuid,
            title: model.title,
            description: model.description,
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl CreateTask {
    pub fn from_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: None,
        }
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        validate_title(&self.title)
    }
}

/// Partial update body. Only fields that are present are written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTask {
    #[serde(default)]
    pub title: Patch<String>,
    #[serde(default)]
    pub status: Patch<TaskStatus>,
}

impl UpdateTask {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Patch::Value(status),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        match &self.title {
            Patch::Null => {
                return Err(TaskError::ValidationError(
                    "title: must not be null".to_string(),
                ));
            }
            Patch::Value(title) => validate_title(title)?,
            Patch::Missing => {}
        }
        if matches!(self.status, Patch::Null) {
            return Err(TaskError::ValidationError(
                "status: must not be null".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<(), TaskError> {
    if title.trim().is_empty() {
        return Err(TaskError::ValidationError(
            "title: must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// 1-indexed page request. Construct through [`Pagination::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u64,
    size: u64,
}

impl Pagination {
    pub fn new(page: u64, size: u64) -> Result<Self, TaskError> {
        if page == 0 {
            return Err(TaskError::ValidationError(
                "page: must be greater than 0".to_string(),
            ));
        }
        if size == 0 {
            return Err(TaskError::ValidationError(
                "size: must be greater than 0".to_string(),
            ));
        }
        Ok(Self { page, size })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Task {
    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let model = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(model.map(Self::from))
    }

    /// Tasks in creation order. A page past the end is empty.
    pub async fn list<C: ConnectionTrait>(
        db: &C,
        pagination: Pagination,
    ) -> Result<Vec<Self>, DbErr> {
        let models = task::Entity::find()
            .order_by_asc(task::Column::CreatedAt)
            .order_by_asc(task::Column::Id)
            .offset(pagination.offset())
            .limit(pagination.size())
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from).collect())
    }

    pub async fn create<C: TransactionTrait>(db: &C, data: &CreateTask) -> Result<Self, TaskError> {
        data.validate()?;
        let task_id = Uuid::new_v4();
        retry_on_busy(|| Self::create_once(db, data, task_id)).await
    }

    async fn create_once<C: TransactionTrait>(
        db: &C,
        data: &CreateTask,
        task_id: Uuid,
    ) -> Result<Self, TaskError> {
        let tx = db.begin().await?;
        let now = Utc::now();
        let active = task::ActiveModel {
            uuid: Set(task_id),
            title: Set(data.title.clone()),
            description: Set(data.description.clone()),
            status: Set(data.status.unwrap_or_default()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = active.insert(&tx).await?;
        tx.commit().await?;
        Ok(model.into())
    }

    /// Read-modify-write in one transaction. `updated_at` never moves backwards.
    pub async fn update<C: TransactionTrait>(
        db: &C,
        id: Uuid,
        data: &UpdateTask,
    ) -> Result<Self, TaskError> {
        data.validate()?;
        retry_on_busy(|| Self::update_once(db, id, data)).await
    }

    async fn update_once<C: TransactionTrait>(
        db: &C,
        id: Uuid,
        data: &UpdateTask,
    ) -> Result<Self, TaskError> {
        let tx = db.begin().await?;
        claim_row(&tx, id).await?;
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(&tx)
            .await?
            .ok_or(TaskError::TaskNotFound)?;

        let previous_updated_at = record.updated_at;
        let mut active: task::ActiveModel = record.into();
        if let Patch::Value(title) = &data.title {
            active.title = Set(title.clone());
        }
        if let Patch::Value(status) = data.status {
            active.status = Set(status);
        }
        active.updated_at = Set(Utc::now().max(previous_updated_at));

        let model = active.update(&tx).await?;
        tx.commit().await?;
        Ok(model.into())
    }

    /// Physically removes the row and returns what was deleted.
    pub async fn delete<C: TransactionTrait>(db: &C, id: Uuid) -> Result<Self, TaskError> {
        retry_on_busy(|| Self::delete_once(db, id)).await
    }

    async fn delete_once<C: TransactionTrait>(db: &C, id: Uuid) -> Result<Self, TaskError> {
        let tx = db.begin().await?;
        claim_row(&tx, id).await?;
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(&tx)
            .await?
            .ok_or(TaskError::TaskNotFound)?;

        let result = task::Entity::delete_by_id(record.id).exec(&tx).await?;
        if result.rows_affected == 0 {
            return Err(TaskError::TaskNotFound);
        }
        tx.commit().await?;
        Ok(record.into())
    }
}

/// Writes to the row before anything reads it, so the transaction holds the
/// write lock from its first statement. On SQLite a transaction that reads
/// first can only upgrade its lock, and that upgrade fails instead of waiting
/// when another writer got there first. Elsewhere this is the row lock.
async fn claim_row<C: ConnectionTrait>(tx: &C, id: Uuid) -> Result<(), TaskError> {
    let result = task::Entity::update_many()
        .col_expr(task::Column::UpdatedAt, Expr::col(task::Column::UpdatedAt).into())
        .filter(task::Column::Uuid.eq(id))
        .exec(tx)
        .await?;
    if result.rows_affected == 0 {
        return Err(TaskError::TaskNotFound);
    }
    Ok(())
}
