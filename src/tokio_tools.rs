use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use crate::domain::GameId;

/// Spawn a Tokio task inside a `task` span carrying its name.
pub fn spawn_named_task<F, S>(name: S, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
    S: Into<String>,
{
    let name_owned = name.into();
    let span = info_span!("task", task_name = %name_owned);
    tokio::spawn(future.instrument(span))
}

/// Task scoped to one game: the name carries the short game id so per-peer
/// tasks stay distinguishable when many sessions share a runtime.
pub fn spawn_game_task<F>(kind: &str, game_id: GameId, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let short = game_id.simple().to_string();
    let short = short.get(..8).unwrap_or(short.as_str());
    spawn_named_task(format!("{kind}:{short}"), future)
}
