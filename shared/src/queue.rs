//! Wire format for the redis-backed worker task queue.
//!
//! The API pushes requests with LPUSH and the worker consumes them with
//! BRPOP, so tasks are delivered oldest-first to a single consumer.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TASK_QUEUE_KEY: &str = "worker:tasks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "bot_run_loop")]
    RunLoop,
    #[serde(rename = "bot_stop")]
    Stop,
}

impl TaskKind {
    /// Task name persisted on the job row.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::RunLoop => "bot_run_loop",
            TaskKind::Stop => "bot_stop",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: TaskKind,
    pub bot_id: i32,
    /// Correlation id recorded on the job row, so operators can match a
    /// queued request to the run it produced.
    pub request_id: String,
}

impl TaskRequest {
    pub fn run_loop(bot_id: i32) -> Self {
        TaskRequest {
            task: TaskKind::RunLoop,
            bot_id,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn stop(bot_id: i32) -> Self {
        TaskRequest {
            task: TaskKind::Stop,
            bot_id,
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

pub async fn enqueue(
    conn: &mut redis::aio::MultiplexedConnection,
    request: &TaskRequest,
) -> redis::RedisResult<()> {
    let body = serde_json::to_string(request).map_err(|err| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "task request serialization failed",
            err.to_string(),
        ))
    })?;
    let _: () = conn.lpush(TASK_QUEUE_KEY, body).await?;
    Ok(())
}
