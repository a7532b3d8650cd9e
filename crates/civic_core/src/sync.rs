use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use crate::api::{GatedApi, LegiScanClient, LegislativeApi};
use crate::changes::ChangeDetector;
use crate::config::SyncConfig;
use crate::db::{self, keys, CacheStore};
use crate::error::{ApiError, ApiResult};
use crate::rate_gate::{Clock, RateGate, TokioClock};
use crate::roster::RosterResolver;
use crate::schema::{sort_votes, HashIndex, Legislator, RollCall, RollCallLedger, VoteRecord};
use crate::session::SessionResolver;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub votes: Vec<VoteRecord>,
    pub from_cache: bool,
    pub bills_processed: usize,
    pub bills_failed: usize,
    pub bills_deferred: usize,
    pub roll_calls_fetched: usize,
}

#[derive(Debug, Clone)]
struct SyncSettings {
    reference_ttl: Duration,
    votes_ttl: Duration,
    max_changed_bills: usize,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            reference_ttl: config.reference_ttl(),
            votes_ttl: config.votes_ttl(),
            max_changed_bills: config.max_changed_bills,
        }
    }
}

pub struct VoteSynchronizer {
    api: Option<GatedApi>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    in_flight: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VoteSynchronizer {
    /// All calls to `api` go through `gate`, which may be shared with other
    /// synchronizers talking to the same upstream.
    pub fn new(
        api: Arc<dyn LegislativeApi>,
        gate: Arc<RateGate>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            api: Some(GatedApi::new(api, gate, config.request_timeout())),
            cache,
            clock,
            settings: SyncSettings::from(config),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// A synchronizer with no upstream: every sync reports "unavailable".
    pub fn disabled(cache: Arc<dyn CacheStore>, config: &SyncConfig) -> Self {
        Self {
            api: None,
            cache,
            clock: Arc::new(TokioClock),
            settings: SyncSettings::from(config),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Builds the LegiScan-backed synchronizer, or a disabled one when no API
    /// key is configured.
    pub fn from_config(config: &SyncConfig, cache: Arc<dyn CacheStore>) -> anyhow::Result<Self> {
        match LegiScanClient::from_config(config)? {
            Some(client) => {
                let gate = Arc::new(RateGate::with_interval(config.min_interval()));
                Ok(Self::new(
                    Arc::new(client),
                    gate,
                    cache,
                    Arc::new(TokioClock),
                    config,
                ))
            }
            None => Ok(Self::disabled(cache, config)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api.is_some()
    }

    /// Remote calls issued by this synchronizer since it was built.
    pub fn remote_calls(&self) -> u64 {
        self.api.as_ref().map(GatedApi::calls).unwrap_or(0)
    }

    /// Only walks bills whose change hash moved since the last sync. A failed
    /// bill or roll call keeps the prior hash, so it is retried next time.
    ///
    /// The legislator's votes, newest first. `None` means the data is
    /// unavailable (feature disabled, no session, or no roster match) and
    /// the caller should use another source.
    pub async fn sync(&self, legislator: &Legislator) -> Option<Vec<VoteRecord>> {
        self.sync_report(legislator).await.map(|report| report.votes)
    }

    pub async fn sync_report(&self, legislator: &Legislator) -> Option<SyncReport> {
        let Some(api) = &self.api else {
            tracing::debug!(legislator = %legislator.id, "vote sync disabled");
            return None;
        };

        let flight = self.flight_lock(&legislator.id);
        let report = {
            let _guard = flight.lock().await;
            self.run(api, legislator).await
        };
        self.release_flight_lock(&legislator.id, flight);
        report
    }

    fn flight_lock(&self, legislator_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight
            .lock()
            .entry(legislator_id.to_string())
            .or_default()
            .clone()
    }

    fn release_flight_lock(&self, legislator_id: &str, flight: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        // one reference in the map, one held here
        if Arc::strong_count(&flight) <= 2 {
            in_flight.remove(legislator_id);
        }
    }

    async fn run(&self, api: &GatedApi, legislator: &Legislator) -> Option<SyncReport> {
        let cache = self.cache.as_ref();
        let now = self.clock.utc_now();

        let session = SessionResolver::new(api, cache, self.settings.reference_ttl)
            .resolve(&legislator.jurisdiction, now)
            .await?;
        let person_id = RosterResolver::new(api, cache, self.settings.reference_ttl)
            .resolve_person(
                &session.session_id,
                &legislator.full_name,
                legislator.last_name.as_deref(),
                now,
            )
            .await?;

        let votes_key = keys::votes(&legislator.id);
        match db::load_fresh::<Vec<VoteRecord>>(cache, &votes_key, self.settings.votes_ttl, now)
            .await
        {
            Ok(Some(mut votes)) => {
                tracing::debug!(legislator = %legislator.id, "votes served from cache");
                sort_votes(&mut votes);
                return Some(SyncReport {
                    votes,
                    from_cache: true,
                    ..SyncReport::default()
                });
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(legislator = %legislator.id, "unreadable cached votes: {err:#}"),
        }

        let hashes_key = keys::hashes(&session.session_id, &legislator.id);
        let ledger_key = keys::rollcalls(&legislator.id);
        let prior_hashes = db::load::<HashIndex>(cache, &hashes_key)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(legislator = %legislator.id, "unreadable hash index: {err:#}");
                None
            })
            .unwrap_or_default();
        let mut ledger = db::load::<RollCallLedger>(cache, &ledger_key)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(legislator = %legislator.id, "unreadable roll call ledger: {err:#}");
                None
            })
            .unwrap_or_default();

        let changes = match ChangeDetector::new(api)
            .detect_changes(&session.session_id, &prior_hashes)
            .await
        {
            Ok(changes) => changes,
            Err(err) => {
                tracing::warn!(session = %session.session_id, "master-bill-index failed: {err}");
                let mut votes = ledger.votes;
                sort_votes(&mut votes);
                return Some(SyncReport {
                    votes,
                    ..SyncReport::default()
                });
            }
        };

        let mut changed = changes.changed_bills;
        changed.sort_by(|a, b| b.last_action_date.cmp(&a.last_action_date));
        let deferred = changed.split_off(changed.len().min(self.settings.max_changed_bills));
        let to_process: BTreeSet<&str> = changed.iter().map(|b| b.bill_id.as_str()).collect();

        let mut report = SyncReport {
            bills_deferred: deferred.len(),
            ..SyncReport::default()
        };

        // Votes on bills about to be re-walked are dropped and their roll
        // calls re-derived; everything else carries over.
        let (dropped, retained): (Vec<VoteRecord>, Vec<VoteRecord>) = ledger
            .votes
            .drain(..)
            .partition(|vote| to_process.contains(vote.source_bill_id.as_str()));
        for vote in &dropped {
            ledger.fetched_roll_call_ids.remove(&vote.source_roll_call_id);
        }

        let mut committed = prior_hashes;
        let mut fresh_votes = Vec::new();

        for bill in &changed {
            let mut detail = match api.bill_detail(&bill.bill_id).await {
                Ok(detail) => detail,
                Err(err) => {
                    report.bills_failed += 1;
                    let lost = dropped.iter().filter(|v| v.source_bill_id == bill.bill_id).count();
                    tracing::warn!(
                        bill = %bill.bill_id,
                        dropped_votes = lost,
                        "bill-detail failed, will retry next sync: {err}"
                    );
                    continue;
                }
            };
            if detail.display_number.is_empty() {
                detail.display_number = bill.display_number.clone();
            }
            if detail.title.is_none() {
                detail.title = bill.title.clone();
            }

            let mut complete = true;
            for roll_call_ref in &detail.roll_calls {
                if ledger.fetched_roll_call_ids.contains(&roll_call_ref.roll_call_id) {
                    continue;
                }
                let mut roll_call = match self.roll_call(api, &roll_call_ref.roll_call_id).await {
                    Ok(roll_call) => roll_call,
                    Err(err) => {
                        complete = false;
                        tracing::warn!(
                            bill = %bill.bill_id,
                            roll_call = %roll_call_ref.roll_call_id,
                            "roll-call-detail failed, will retry next sync: {err}"
                        );
                        continue;
                    }
                };
                if roll_call.bill_id.is_empty() {
                    roll_call.bill_id = bill.bill_id.clone();
                }
                if roll_call.date.is_empty() {
                    roll_call.date = roll_call_ref.date.clone();
                }
                report.roll_calls_fetched += 1;
                ledger
                    .fetched_roll_call_ids
                    .insert(roll_call.roll_call_id.clone());
                if let Some(vote) = VoteRecord::from_roll_call(&roll_call, &detail, &person_id) {
                    fresh_votes.push(vote);
                }
            }

            let enumerated: BTreeSet<&str> = detail
                .roll_calls
                .iter()
                .map(|r| r.roll_call_id.as_str())
                .collect();
            let vanished = dropped
                .iter()
                .filter(|v| v.source_bill_id == bill.bill_id)
                .filter(|v| !enumerated.contains(v.source_roll_call_id.as_str()))
                .count();
            if vanished > 0 {
                tracing::warn!(
                    bill = %bill.bill_id,
                    vanished,
                    "previously synced roll calls no longer listed on bill"
                );
            }

            if complete {
                report.bills_processed += 1;
                if let Some(hash) = changes.fresh_hash_index.get(&bill.bill_id) {
                    committed.insert(bill.bill_id.clone(), hash.clone());
                }
            } else {
                report.bills_failed += 1;
            }
        }

        let mut merged: BTreeMap<String, VoteRecord> = BTreeMap::new();
        for vote in retained.into_iter().chain(fresh_votes) {
            merged.insert(vote.source_roll_call_id.clone(), vote);
        }
        let mut votes: Vec<VoteRecord> = merged.into_values().collect();
        sort_votes(&mut votes);

        let fetched_at = self.clock.utc_now();
        ledger.votes = votes.clone();
        self.persist(&hashes_key, &committed, fetched_at).await;
        self.persist(&ledger_key, &ledger, fetched_at).await;
        self.persist(&votes_key, &votes, fetched_at).await;

        tracing::info!(
            legislator = %legislator.id,
            session = %session.session_id,
            votes = votes.len(),
            processed = report.bills_processed,
            failed = report.bills_failed,
            deferred = report.bills_deferred,
            roll_calls = report.roll_calls_fetched,
            "vote sync complete"
        );

        report.votes = votes;
        Some(report)
    }

    /// Roll calls never change once recorded, so the shared cache entry is
    /// used regardless of age.
    async fn roll_call(&self, api: &GatedApi, roll_call_id: &str) -> ApiResult<RollCall> {
        let key = keys::rollcall(roll_call_id);
        match db::load::<RollCall>(self.cache.as_ref(), &key).await {
            Ok(Some(roll_call)) if !roll_call.per_person_votes.is_empty() => return Ok(roll_call),
            Ok(_) => {}
            Err(err) => tracing::warn!(%roll_call_id, "unreadable cached roll call: {err:#}"),
        }

        let roll_call = api.roll_call_detail(roll_call_id).await?;
        // a truncated tally must not be cached forever
        if roll_call.per_person_votes.is_empty() {
            return Err(ApiError::parse("roll-call-detail", "no per-member votes"));
        }
        self.persist(&key, &roll_call, self.clock.utc_now()).await;
        Ok(roll_call)
    }

    async fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T, fetched_at: OffsetDateTime) {
        if let Err(err) = db::store(self.cache.as_ref(), key, value, fetched_at).await {
            tracing::warn!(%key, "failed to write cache: {err:#}");
        }
    }
}
