//! Question retrieval for new sessions with a bounded wait and a deterministic fallback.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    dao::{
        models::QuestionEntity,
        questions::{FallbackQuestionBank, QuestionRequest, QuestionSupply},
    },
    state::SharedState,
};

/// Questions for a session about to start in `group_id`.
///
/// Never fails: a missing, failing, slow or empty supply is replaced by the fallback bank.
pub async fn session_questions(
    state: &SharedState,
    group_id: &str,
    request: QuestionRequest,
) -> Vec<QuestionEntity> {
    let supply = state.question_supply().await;
    resolve_questions(
        supply.as_deref(),
        state.fallback_questions(),
        state.config().session.question_fetch_timeout,
        group_id,
        request,
    )
    .await
}

pub(crate) async fn resolve_questions(
    supply: Option<&dyn QuestionSupply>,
    fallback: &FallbackQuestionBank,
    fetch_timeout: Duration,
    group_id: &str,
    request: QuestionRequest,
) -> Vec<QuestionEntity> {
    let Some(supply) = supply else {
        debug!(%group_id, "no question supply configured; using fallback bank");
        return fallback.select(&request);
    };

    let fetch = supply.fetch_session_questions(group_id.to_string(), request.clone());
    match timeout(fetch_timeout, fetch).await {
        Ok(Ok(questions)) => {
            let mut playable: Vec<_> = questions.into_iter().filter(|q| q.is_playable()).collect();
            if playable.is_empty() {
                warn!(%group_id, "question supply returned nothing playable; using fallback bank");
                return fallback.select(&request);
            }
            playable.truncate(request.count.max(1));
            playable
        }
        Ok(Err(err)) => {
            warn!(%group_id, error = %err, "question supply failed; using fallback bank");
            fallback.select(&request)
        }
        Err(_) => {
            warn!(
                %group_id,
                timeout_ms = fetch_timeout.as_millis() as u64,
                "question supply timed out; using fallback bank"
            );
            fallback.select(&request)
        }
    }
}
