use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::platform::{IncomingInlineQuery, IncomingUpdate, InlineAnswerer};
use crate::voice;

/// Drains incoming updates and answers every inline query on its own task
pub struct UpdateDispatcher<A> {
    answerer: Arc<A>,
    voice_base_url: Arc<str>,
    permits: Arc<Semaphore>,
}

impl<A: InlineAnswerer + 'static> UpdateDispatcher<A> {
    pub fn new(answerer: Arc<A>, voice_base_url: &str, max_concurrent_answers: usize) -> Self {
        Self {
            answerer,
            voice_base_url: Arc::from(voice_base_url),
            permits: Arc::new(Semaphore::new(
                max_concurrent_answers.min(Semaphore::MAX_PERMITS),
            )),
        }
    }

    /// Run until `updates` closes or `shutdown` is cancelled, then wait for
    /// in-flight handlers.
    pub async fn run(
        self,
        mut updates: mpsc::Receiver<IncomingUpdate>,
        shutdown: CancellationToken,
    ) {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Shutdown requested, no longer accepting updates");
                    break;
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    log_join_error(joined);
                }
                update = updates.recv() => match update {
                    Some(IncomingUpdate::InlineQuery(query)) => {
                        // Wait for a free slot; bounded channel applies backpressure to polling
                        let permit = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            permit = self.permits.clone().acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break,
                            },
                        };

                        let answerer = self.answerer.clone();
                        let base_url = self.voice_base_url.clone();
                        handlers.spawn(async move {
                            handle_inline_query(answerer.as_ref(), &base_url, query).await;
                            drop(permit);
                        });
                    }
                    Some(IncomingUpdate::Other) => debug!("Ignoring non-inline-query update"),
                    None => {
                        debug!("Update stream closed");
                        break;
                    }
                },
            }
        }

        if !handlers.is_empty() {
            info!("Waiting for {} in-flight inline answer(s)", handlers.len());
        }
        while let Some(joined) = handlers.join_next().await {
            log_join_error(joined);
        }

        info!("Dispatcher stopped");
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Inline query handler task failed: {}", e);
    }
}

/// Answer one inline query with the greeting voice. Failures are logged and dropped.
pub async fn handle_inline_query<A: InlineAnswerer + ?Sized>(
    answerer: &A,
    voice_base_url: &str,
    query: IncomingInlineQuery,
) {
    info!(
        "Inline query received from {} user {} ({}): {:?}",
        query.platform,
        query.user_id,
        query.user_name.as_deref().unwrap_or("-"),
        query.query
    );

    let answer = voice::answer_for(&query.query_id, voice_base_url);

    match answerer.answer_inline_query(answer).await {
        Ok(()) => debug!("Answered inline query {}", query.query_id),
        Err(e) => error!("Failed to answer inline query {}: {:#}", query.query_id, e),
    }
}
