use time::{Duration, OffsetDateTime};

use crate::api::LegislativeApi;
use crate::db::{self, keys, CacheStore};
use crate::schema::RosterEntry;

pub struct RosterResolver<'a> {
    api: &'a dyn LegislativeApi,
    cache: &'a dyn CacheStore,
    ttl: Duration,
}

impl<'a> RosterResolver<'a> {
    pub fn new(api: &'a dyn LegislativeApi, cache: &'a dyn CacheStore, ttl: Duration) -> Self {
        Self { api, cache, ttl }
    }

    pub async fn roster(&self, session_id: &str, now: OffsetDateTime) -> Option<Vec<RosterEntry>> {
        let key = keys::roster(session_id);
        match db::load_fresh::<Vec<RosterEntry>>(self.cache, &key, self.ttl, now).await {
            Ok(Some(roster)) => {
                tracing::debug!(%session_id, "roster served from cache");
                return Some(roster);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%session_id, "unreadable cached roster: {err:#}"),
        }

        let roster = match self.api.session_roster(session_id).await {
            Ok(roster) => roster,
            Err(err) => {
                tracing::warn!(%session_id, "session-roster failed: {err}");
                return None;
            }
        };
        if roster.is_empty() {
            tracing::warn!(%session_id, "session-roster returned no members, will retry next sync");
            return None;
        }
        if let Err(err) = db::store(self.cache, &key, &roster, now).await {
            tracing::warn!(%session_id, "failed to cache roster: {err:#}");
        }
        Some(roster)
    }

    pub async fn resolve_person(
        &self,
        session_id: &str,
        full_name: &str,
        last_name_hint: Option<&str>,
        now: OffsetDateTime,
    ) -> Option<String> {
        let roster = self.roster(session_id, now).await?;
        let entry = match_person(&roster, full_name, last_name_hint);
        if entry.is_none() {
            tracing::info!(%session_id, %full_name, "no roster match");
        }
        entry.map(|entry| entry.person_id.clone())
    }
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Case-insensitive, first match wins: roster full name, then rebuilt
/// `{first} {last}`, then last name alone in roster order.
pub fn match_person<'r>(
    roster: &'r [RosterEntry],
    full_name: &str,
    last_name_hint: Option<&str>,
) -> Option<&'r RosterEntry> {
    let wanted = normalize(full_name);
    if wanted.is_empty() {
        return None;
    }

    if let Some(entry) = roster.iter().find(|e| normalize(&e.full_name) == wanted) {
        return Some(entry);
    }

    if let Some(entry) = roster
        .iter()
        .find(|e| normalize(&format!("{} {}", e.first_name, e.last_name)) == wanted)
    {
        return Some(entry);
    }

    let last = last_name_hint
        .map(normalize)
        .filter(|hint| !hint.is_empty())
        .or_else(|| wanted.rsplit(' ').next().map(str::to_string))?;
    roster.iter().find(|e| normalize(&e.last_name) == last)
}
