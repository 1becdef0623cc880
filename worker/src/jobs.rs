//! Job lifecycle tracking.
//!
//! A job row records one logical run of a task against a bot. For a given
//! (bot, task) pair at most one row may be queued or running; re-requesting
//! the same task reclaims that row instead of creating a duplicate. All
//! functions are generic over the connection so they compose with the loop's
//! per-tick transactions.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};

use shared::entity::jobs;
use shared::models::JobStatus;

/// Find the active (queued or running) job for (bot, task) and attach the new
/// correlation id to it, or create a fresh queued row.
pub async fn acquire_or_reuse<C: ConnectionTrait>(
    conn: &C,
    bot_id: Option<i32>,
    task: &str,
    request_id: Option<&str>,
) -> Result<jobs::Model, DbErr> {
    let mut query = jobs::Entity::find()
        .filter(jobs::Column::Task.eq(task))
        .filter(jobs::Column::Status.is_in([JobStatus::Queued.as_str(), JobStatus::Running.as_str()]))
        .order_by_desc(jobs::Column::CreatedAt);
    query = match bot_id {
        Some(id) => query.filter(jobs::Column::BotId.eq(id)),
        None => query.filter(jobs::Column::BotId.is_null()),
    };

    if let Some(job) = query.one(conn).await? {
        if let Some(request_id) = request_id {
            let mut active: jobs::ActiveModel = job.into();
            active.request_id = Set(Some(request_id.to_string()));
            active.updated_at = Set(Utc::now());
            return active.update(conn).await;
        }
        return Ok(job);
    }

    let now = Utc::now();
    jobs::ActiveModel {
        bot_id: Set(bot_id),
        task: Set(task.to_string()),
        status: Set(JobStatus::Queued.as_str().to_string()),
        progress: Set(0),
        message: Set(Some("Queued".to_string())),
        request_id: Set(request_id.map(str::to_string)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
}

/// Move a job forward. Terminal rows are returned untouched; a later run must
/// acquire its own row.
pub async fn advance<C: ConnectionTrait>(
    conn: &C,
    job: jobs::Model,
    status: JobStatus,
    progress: i32,
    message: &str,
) -> Result<jobs::Model, DbErr> {
    if JobStatus::is_terminal(&job.status) {
        return Ok(job);
    }

    let mut active: jobs::ActiveModel = job.into();
    active.status = Set(status.as_str().to_string());
    active.progress = Set(progress.clamp(0, 100));
    active.message = Set(Some(message.to_string()));
    active.updated_at = Set(Utc::now());
    active.update(conn).await
}

/// Update only the message, for retriable conditions that leave the job
/// status alone.
pub async fn record_message<C: ConnectionTrait>(
    conn: &C,
    job: jobs::Model,
    message: &str,
) -> Result<jobs::Model, DbErr> {
    if JobStatus::is_terminal(&job.status) {
        return Ok(job);
    }

    let mut active: jobs::ActiveModel = job.into();
    active.message = Set(Some(message.to_string()));
    active.updated_at = Set(Utc::now());
    active.update(conn).await
}
