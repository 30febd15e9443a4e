use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::debug;

use crate::dao::{
    leaderboard::{ApplyOutcome, LeaderboardStore},
    membership::MembershipDirectory,
    models::{LeaderboardDelta, QuestionEntity, StandingEntity, sort_standings},
    questions::{QuestionRequest, QuestionSupply, select_questions},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchLeaderboardDocument, CouchMembershipDocument, CouchQuestionDocument,
        END_SUFFIX, QUESTION_PREFIX, leaderboard_doc_id, membership_doc_id,
    },
};

const MAX_CONFLICT_RETRIES: usize = 3;

/// CouchDB implementation of every collaborator the coordinator consumes.
#[derive(Clone)]
pub struct CouchStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn database_request(&self, method: Method) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, self.database);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .database_request(Method::GET)
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .database_request(Method::PUT)
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                doc_id: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }

    /// Read-modify-write of the group leaderboard document, retried on revision conflicts.
    async fn apply_delta_inner(&self, delta: LeaderboardDelta) -> CouchResult<ApplyOutcome> {
        let doc_id = leaderboard_doc_id(&delta.group_id);
        let mut attempt = 0;

        loop {
            let mut doc = self
                .get_document::<CouchLeaderboardDocument>(&doc_id)
                .await?
                .unwrap_or_else(|| CouchLeaderboardDocument::empty(&delta.group_id));

            if doc.applied_sessions.contains(&delta.session_id) {
                sort_standings(&mut doc.standings);
                return Ok(ApplyOutcome {
                    standings: doc.standings,
                    already_applied: true,
                });
            }

            for entry in &delta.entries {
                match doc
                    .standings
                    .iter_mut()
                    .find(|standing| standing.user_id == entry.user_id)
                {
                    Some(standing) => standing.apply(entry),
                    None => {
                        let mut standing = StandingEntity {
                            user_id: entry.user_id.clone(),
                            ..StandingEntity::default()
                        };
                        standing.apply(entry);
                        doc.standings.push(standing);
                    }
                }
            }
            doc.applied_sessions.push(delta.session_id);
            sort_standings(&mut doc.standings);

            match self.put_document(&doc_id, &doc).await {
                Ok(()) => {
                    return Ok(ApplyOutcome {
                        standings: doc.standings,
                        already_applied: false,
                    });
                }
                Err(CouchDaoError::Conflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(%doc_id, attempt, "leaderboard document conflict; retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl LeaderboardStore for CouchStore {
    fn apply_delta(&self, delta: LeaderboardDelta) -> BoxFuture<'static, StorageResult<ApplyOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.apply_delta_inner(delta).await.map_err(Into::into) })
    }

    fn standings(
        &self,
        group_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<StandingEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = leaderboard_doc_id(&group_id);
            let Some(mut doc) = store
                .get_document::<CouchLeaderboardDocument>(&doc_id)
                .await?
            else {
                return Ok(Vec::new());
            };
            sort_standings(&mut doc.standings);
            doc.standings.truncate(limit);
            Ok(doc.standings)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = format!("{}/{}", store.base_url, store.database);
            let response = store
                .database_request(Method::GET)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}

impl QuestionSupply for CouchStore {
    fn fetch_session_questions(
        &self,
        group_id: String,
        request: QuestionRequest,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let pool: Vec<QuestionEntity> = store
                .list_documents::<CouchQuestionDocument>(QUESTION_PREFIX)
                .await?
                .into_iter()
                .map(|doc| doc.question)
                .filter(QuestionEntity::is_playable)
                .collect();
            debug!(%group_id, pool = pool.len(), "loaded question pool from CouchDB");
            Ok(select_questions(&pool, &request))
        })
    }
}

impl MembershipDirectory for CouchStore {
    fn is_member(&self, group_id: String, user_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchMembershipDocument>(&membership_doc_id(&group_id))
                .await?;
            // Groups without a membership document are not managed by the directory.
            Ok(doc.is_none_or(|doc| doc.members.iter().any(|member| member == &user_id)))
        })
    }
}
