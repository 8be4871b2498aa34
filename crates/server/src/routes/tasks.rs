use axum::{
    Extension, Router,
    extract::{Path, RawQuery, State},
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::models::task::{
    CreateTask, DEFAULT_PAGE, DEFAULT_PAGE_SIZE, Pagination, Task, UpdateTask,
};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;
use utils_jwt::Principal;
use uuid::Uuid;

use crate::{
    Deployment,
    error::{ApiError, TASK_NOT_FOUND},
    extract::ValidatedJson,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteTaskResponse {
    pub detail: String,
}

pub async fn get_tasks(
    State(deployment): State<Deployment>,
    Extension(principal): Extension<Principal>,
    RawQuery(query): RawQuery,
) -> Result<ResponseJson<Vec<Task>>, ApiError> {
    let pagination = parse_pagination(query.as_deref(), deployment.config().max_page_size)?;
    let tasks = deployment
        .storage(Task::list(&deployment.db().pool, pagination))
        .await?;

    tracing::info!(
        subject = %principal.subject,
        page = pagination.page(),
        size = pagination.size(),
        returned = tasks.len(),
        "Listed tasks"
    );
    Ok(ResponseJson(tasks))
}

pub async fn create_task(
    State(deployment): State<Deployment>,
    Extension(principal): Extension<Principal>,
    ValidatedJson(payload): ValidatedJson<CreateTask>,
) -> Result<ResponseJson<Task>, ApiError> {
    payload.validate()?;

    let task = deployment
        .spawn_storage(move |db| async move { Task::create(&db, &payload).await })
        .await?;

    tracing::info!(task_id = %task.id, subject = %principal.subject, "Created task");
    Ok(ResponseJson(task))
}

pub async fn update_task(
    State(deployment): State<Deployment>,
    Extension(principal): Extension<Principal>,
    Path(task_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<UpdateTask>,
) -> Result<ResponseJson<Task>, ApiError> {
    let task_id = parse_task_id(&task_id)?;
    payload.validate()?;

    let task = deployment
        .spawn_storage_then(
            move |db| async move { Task::update(&db, task_id, &payload).await },
            |cache, task| async move {
                cache.set(&task).await;
                task
            },
        )
        .await?;

    tracing::info!(task_id = %task.id, subject = %principal.subject, "Updated task");
    Ok(ResponseJson(task))
}

pub async fn delete_task(
    State(deployment): State<Deployment>,
    Extension(principal): Extension<Principal>,
    Path(task_id): Path<String>,
) -> Result<ResponseJson<DeleteTaskResponse>, ApiError> {
    let task_id = parse_task_id(&task_id)?;

    let task = deployment
        .spawn_storage_then(
            move |db| async move { Task::delete(&db, task_id).await },
            |cache, task| async move {
                cache.delete(task.id).await;
                task
            },
        )
        .await?;

    tracing::info!(task_id = %task.id, subject = %principal.subject, "Deleted task");
    Ok(ResponseJson(DeleteTaskResponse {
        detail: "Task deleted successfully".to_string(),
    }))
}

/// An id that is not a UUID cannot name a stored task.
fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(TASK_NOT_FOUND.to_string()))
}

fn parse_pagination(query: Option<&str>, max_page_size: u64) -> Result<Pagination, ApiError> {
    let mut page = DEFAULT_PAGE;
    let mut size = DEFAULT_PAGE_SIZE;

    for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "page" => page = parse_positive("page", &value)?,
            "size" => size = parse_positive("size", &value)?,
            _ => {}
        }
    }

    if size > max_page_size {
        return Err(ApiError::Validation(format!(
            "size: must be at most {max_page_size}"
        )));
    }
    Ok(Pagination::new(page, size)?)
}

fn parse_positive(name: &str, value: &str) -> Result<u64, ApiError> {
    match value.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed as u64),
        Ok(_) => Err(ApiError::Validation(format!(
            "{name}: must be greater than 0"
        ))),
        Err(_) => Err(ApiError::Validation(format!(
            "{name}: must be an integer"
        ))),
    }
}

pub fn router() -> Router<Deployment> {
    Router::new()
        .route("/tasks", get(get_tasks).post(create_task))
        .route("/tasks/{id}", put(update_task).delete(delete_task))
}
