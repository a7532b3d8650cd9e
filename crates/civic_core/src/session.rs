use time::{Duration, OffsetDateTime};

use crate::api::LegislativeApi;
use crate::db::{self, keys, CacheStore};
use crate::schema::Session;

pub struct SessionResolver<'a> {
    api: &'a dyn LegislativeApi,
    cache: &'a dyn CacheStore,
    ttl: Duration,
}

impl<'a> SessionResolver<'a> {
    pub fn new(api: &'a dyn LegislativeApi, cache: &'a dyn CacheStore, ttl: Duration) -> Self {
        Self { api, cache, ttl }
    }

    /// The active session, or `None` when sessions are unavailable.
    pub async fn resolve(&self, jurisdiction: &str, now: OffsetDateTime) -> Option<Session> {
        let key = keys::sessions(jurisdiction);
        match db::load_fresh::<Vec<Session>>(self.cache, &key, self.ttl, now).await {
            Ok(Some(sessions)) if !sessions.is_empty() => {
                tracing::debug!(%jurisdiction, "session list served from cache");
                return sessions.into_iter().next();
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%jurisdiction, "unreadable cached sessions: {err:#}"),
        }

        let mut sessions = match self.api.list_sessions(jurisdiction).await {
            Ok(sessions) => sessions,
            Err(err) => {
                tracing::warn!(%jurisdiction, "list-sessions failed: {err}");
                return None;
            }
        };
        if sessions.is_empty() {
            tracing::warn!(%jurisdiction, "no sessions returned");
            return None;
        }

        sort_sessions(&mut sessions);
        if let Err(err) = db::store(self.cache, &key, &sessions, now).await {
            tracing::warn!(%jurisdiction, "failed to cache sessions: {err:#}");
        }
        sessions.into_iter().next()
    }
}

/// Latest `year_end` first; regular sessions before special ones.
pub fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.year_end
            .cmp(&a.year_end)
            .then_with(|| a.is_special.cmp(&b.is_special))
    });
}
