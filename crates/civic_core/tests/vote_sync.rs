use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;

use civic_core::db::{self, keys};
use civic_core::schema::{
    BillDetail, BillHashEntry, HashIndex, Legislator, Position, RollCall, RollCallLedger,
    RollCallRef, RosterEntry, Session, Tallies,
};
use civic_core::{
    ApiError, ApiResult, LegislativeApi, ManualClock, MemoryCache, RateGate, SyncConfig,
    VoteSynchronizer,
};

const PERSON: &str = "7001";
const SESSION: &str = "2041";

#[derive(Default)]
struct Upstream {
    index: Vec<BillHashEntry>,
    bills: HashMap<String, BillDetail>,
    roll_calls: HashMap<String, RollCall>,
    failing: HashSet<String>,
    calls: Vec<String>,
    sessions_fail: bool,
    roster_empty: bool,
    index_fails: bool,
}

#[derive(Default)]
struct FakeApi {
    upstream: Mutex<Upstream>,
}

impl FakeApi {
    fn calls(&self) -> Vec<String> {
        self.upstream.lock().calls.clone()
    }

    fn clear_calls(&self) {
        self.upstream.lock().calls.clear();
    }

    fn set_bill(&self, bill_id: &str, hash: &str, last_action: &str, roll_calls: &[&str]) {
        let mut up = self.upstream.lock();
        up.index.retain(|b| b.bill_id != bill_id);
        up.index.push(BillHashEntry {
            bill_id: bill_id.to_string(),
            display_number: format!("HB {bill_id}"),
            title: Some(format!("Bill {bill_id}")),
            change_hash: hash.to_string(),
            last_action_date: Some(last_action.to_string()),
        });
        up.bills.insert(
            bill_id.to_string(),
            BillDetail {
                bill_id: bill_id.to_string(),
                display_number: format!("HB {bill_id}"),
                title: Some(format!("Bill {bill_id}")),
                roll_calls: roll_calls
                    .iter()
                    .map(|id| RollCallRef {
                        roll_call_id: id.to_string(),
                        date: last_action.to_string(),
                        description: "Third Reading".to_string(),
                    })
                    .collect(),
            },
        );
    }

    /// `vote` of `None` leaves the legislator off the roll call.
    fn set_roll_call(&self, roll_call_id: &str, bill_id: &str, date: &str, vote: Option<&str>) {
        let mut per_person_votes = BTreeMap::new();
        per_person_votes.insert("9999".to_string(), "Yea".to_string());
        if let Some(vote) = vote {
            per_person_votes.insert(PERSON.to_string(), vote.to_string());
        }
        self.upstream.lock().roll_calls.insert(
            roll_call_id.to_string(),
            RollCall {
                roll_call_id: roll_call_id.to_string(),
                bill_id: bill_id.to_string(),
                date: date.to_string(),
                description: "Third Reading".to_string(),
                chamber: Some("H".to_string()),
                tallies: Tallies {
                    yea: 60,
                    nay: 35,
                    not_voting: 3,
                    absent: 2,
                },
                passed: Some(true),
                per_person_votes,
            },
        );
    }

    /// Upstream answers for the roll call but without any member votes.
    fn truncate_roll_call(&self, roll_call_id: &str) {
        if let Some(rc) = self.upstream.lock().roll_calls.get_mut(roll_call_id) {
            rc.per_person_votes.clear();
        }
    }

    fn fail(&self, id: &str) {
        self.upstream.lock().failing.insert(id.to_string());
    }

    fn heal(&self, id: &str) {
        self.upstream.lock().failing.remove(id);
    }

    fn record(&self, call: String) -> bool {
        let mut up = self.upstream.lock();
        let id = call.split(':').nth(1).unwrap_or_default().to_string();
        up.calls.push(call);
        up.failing.contains(&id)
    }
}

fn unavailable() -> ApiError {
    ApiError::ApiStatus {
        status: 503,
        message: "unavailable".to_string(),
    }
}

#[async_trait]
impl LegislativeApi for FakeApi {
    async fn list_sessions(&self, jurisdiction: &str) -> ApiResult<Vec<Session>> {
        self.record(format!("sessions:{jurisdiction}"));
        if self.upstream.lock().sessions_fail {
            return Err(unavailable());
        }
        Ok(vec![
            Session {
                session_id: "1999".to_string(),
                jurisdiction: jurisdiction.to_string(),
                name: Some("2022 Regular Session".to_string()),
                year_start: 2022,
                year_end: 2022,
                is_special: false,
            },
            Session {
                session_id: SESSION.to_string(),
                jurisdiction: jurisdiction.to_string(),
                name: Some("2024 Regular Session".to_string()),
                year_start: 2024,
                year_end: 2024,
                is_special: false,
            },
        ])
    }

    async fn session_roster(&self, session_id: &str) -> ApiResult<Vec<RosterEntry>> {
        self.record(format!("roster:{session_id}"));
        if self.upstream.lock().roster_empty {
            return Ok(Vec::new());
        }
        Ok(vec![RosterEntry {
            person_id: PERSON.to_string(),
            full_name: "Jane Q. Smith".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Smith".to_string(),
            chamber_role: Some("Rep".to_string()),
            party: Some("D".to_string()),
            district: Some("HD-044".to_string()),
        }])
    }

    async fn master_bill_index(&self, session_id: &str) -> ApiResult<Vec<BillHashEntry>> {
        self.record(format!("index:{session_id}"));
        let up = self.upstream.lock();
        if up.index_fails {
            return Err(unavailable());
        }
        Ok(up.index.clone())
    }

    async fn bill_detail(&self, bill_id: &str) -> ApiResult<BillDetail> {
        if self.record(format!("bill:{bill_id}")) {
            return Err(unavailable());
        }
        self.upstream
            .lock()
            .bills
            .get(bill_id)
            .cloned()
            .ok_or_else(unavailable)
    }

    async fn roll_call_detail(&self, roll_call_id: &str) -> ApiResult<RollCall> {
        if self.record(format!("rollcall:{roll_call_id}")) {
            return Err(unavailable());
        }
        self.upstream
            .lock()
            .roll_calls
            .get(roll_call_id)
            .cloned()
            .ok_or_else(unavailable)
    }
}

struct Harness {
    api: Arc<FakeApi>,
    cache: Arc<MemoryCache>,
    clock: Arc<ManualClock>,
    sync: VoteSynchronizer,
}

fn harness_with(config: SyncConfig) -> Harness {
    let api = Arc::new(FakeApi::default());
    let cache = Arc::new(MemoryCache::new());
    let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 09:00 UTC)));
    let gate = Arc::new(RateGate::new(config.min_interval(), clock.clone()));
    let sync = VoteSynchronizer::new(api.clone(), gate, cache.clone(), clock.clone(), &config);
    Harness {
        api,
        cache,
        clock,
        sync,
    }
}

fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

fn legislator() -> Legislator {
    Legislator {
        id: "leg-1".to_string(),
        full_name: "Jane Smith".to_string(),
        last_name: None,
        jurisdiction: "KY".to_string(),
    }
}

fn a_day_later(h: &Harness) {
    h.clock.advance(Duration::from_secs(25 * 3600));
}

async fn stored_hashes(h: &Harness) -> HashIndex {
    db::load::<HashIndex>(h.cache.as_ref(), &keys::hashes(SESSION, "leg-1"))
        .await
        .unwrap()
        .unwrap_or_default()
}

fn positions(votes: &[civic_core::schema::VoteRecord]) -> Vec<(String, Position)> {
    votes
        .iter()
        .map(|v| (v.source_roll_call_id.clone(), v.position.clone()))
        .collect()
}

/// Bill A (h1) with roll call R1 where she voted Yea; bill B (h2) with R2
/// where she is absent from the tally.
fn seed_two_bills(h: &Harness) {
    h.api.set_bill("A", "h1", "2024-02-01", &["R1"]);
    h.api.set_roll_call("R1", "A", "2024-02-01", Some("Yea"));
    h.api.set_bill("B", "h2", "2024-02-05", &["R2"]);
    h.api.set_roll_call("R2", "B", "2024-02-05", None);
}

#[tokio::test]
async fn first_sync_derives_votes_and_stores_hashes() {
    let h = harness();
    seed_two_bills(&h);

    let votes = h.sync.sync(&legislator()).await.unwrap();

    assert_eq!(positions(&votes), vec![("R1".to_string(), Position::Yea)]);
    assert_eq!(votes[0].bill_number, "HB A");
    assert_eq!(votes[0].result, "Passed");
    assert_eq!(votes[0].not_voting_count, 5);

    let hashes = stored_hashes(&h).await;
    assert_eq!(hashes.get("A").map(String::as_str), Some("h1"));
    assert_eq!(hashes.get("B").map(String::as_str), Some("h2"));
}

#[tokio::test]
async fn changed_bill_is_rederived_and_unchanged_bill_is_skipped() {
    let h = harness();
    seed_two_bills(&h);
    h.sync.sync(&legislator()).await.unwrap();

    h.api.set_bill("A", "h3", "2024-02-20", &["R1", "R3"]);
    h.api.set_roll_call("R3", "A", "2024-02-20", Some("Nay"));
    h.api.clear_calls();
    a_day_later(&h);

    let votes = h.sync.sync(&legislator()).await.unwrap();

    assert_eq!(
        positions(&votes),
        vec![
            ("R3".to_string(), Position::Nay),
            ("R1".to_string(), Position::Yea),
        ]
    );
    // R1 comes back from the shared roll call cache; B is never touched.
    assert_eq!(
        h.api.calls(),
        vec!["index:2041", "bill:A", "rollcall:R3"]
    );
    let hashes = stored_hashes(&h).await;
    assert_eq!(hashes.get("A").map(String::as_str), Some("h3"));
    assert_eq!(hashes.get("B").map(String::as_str), Some("h2"));
}

#[tokio::test]
async fn unchanged_upstream_is_idempotent() {
    let h = harness();
    seed_two_bills(&h);
    let first = h.sync.sync(&legislator()).await.unwrap();

    h.api.clear_calls();
    a_day_later(&h);
    let second = h.sync.sync(&legislator()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(h.api.calls(), vec!["index:2041"]);
}

#[tokio::test]
async fn fresh_aggregate_needs_no_remote_calls() {
    let h = harness();
    seed_two_bills(&h);
    let first = h.sync.sync(&legislator()).await.unwrap();
    let calls_after_first = h.sync.remote_calls();

    h.clock.advance(Duration::from_secs(3600));
    let report = h.sync.sync_report(&legislator()).await.unwrap();

    assert!(report.from_cache);
    assert_eq!(report.votes, first);
    assert_eq!(h.sync.remote_calls(), calls_after_first);
}

#[tokio::test]
async fn failed_roll_call_is_retried_next_sync() {
    let h = harness();
    seed_two_bills(&h);
    h.api.fail("R1");

    let report = h.sync.sync_report(&legislator()).await.unwrap();
    assert!(report.votes.is_empty());
    assert_eq!(report.bills_failed, 1);
    assert!(!stored_hashes(&h).await.contains_key("A"));

    h.api.heal("R1");
    h.api.clear_calls();
    a_day_later(&h);

    let votes = h.sync.sync(&legislator()).await.unwrap();
    assert_eq!(positions(&votes), vec![("R1".to_string(), Position::Yea)]);
    assert!(h.api.calls().contains(&"rollcall:R1".to_string()));
    assert_eq!(
        stored_hashes(&h).await.get("A").map(String::as_str),
        Some("h1")
    );
}

#[tokio::test]
async fn failed_bill_detail_keeps_prior_hash() {
    let h = harness();
    seed_two_bills(&h);
    h.sync.sync(&legislator()).await.unwrap();

    h.api.set_bill("A", "h3", "2024-02-20", &["R1"]);
    h.api.fail("A");
    a_day_later(&h);
    let report = h.sync.sync_report(&legislator()).await.unwrap();

    assert_eq!(report.bills_failed, 1);
    assert_eq!(
        stored_hashes(&h).await.get("A").map(String::as_str),
        Some("h1")
    );

    h.api.heal("A");
    a_day_later(&h);
    let votes = h.sync.sync(&legislator()).await.unwrap();
    assert_eq!(positions(&votes), vec![("R1".to_string(), Position::Yea)]);
    assert_eq!(
        stored_hashes(&h).await.get("A").map(String::as_str),
        Some("h3")
    );
}

#[tokio::test]
async fn changed_bills_beyond_cap_are_deferred_newest_first() {
    let config = SyncConfig {
        max_changed_bills: 1,
        ..SyncConfig::default()
    };
    let h = harness_with(config);
    h.api.set_bill("OLD", "h1", "2024-01-10", &["R10"]);
    h.api.set_roll_call("R10", "OLD", "2024-01-10", Some("Nay"));
    h.api.set_bill("NEW", "h2", "2024-02-10", &["R20"]);
    h.api.set_roll_call("R20", "NEW", "2024-02-10", Some("Present"));

    let report = h.sync.sync_report(&legislator()).await.unwrap();
    assert_eq!(report.bills_processed, 1);
    assert_eq!(report.bills_deferred, 1);
    assert_eq!(
        positions(&report.votes),
        vec![("R20".to_string(), Position::Present)]
    );
    assert!(!stored_hashes(&h).await.contains_key("OLD"));

    a_day_later(&h);
    let votes = h.sync.sync(&legislator()).await.unwrap();
    assert_eq!(
        positions(&votes),
        vec![
            ("R20".to_string(), Position::Present),
            ("R10".to_string(), Position::Nay),
        ]
    );
}

#[tokio::test]
async fn repeated_roll_call_ids_yield_one_record() {
    let h = harness();
    h.api.set_bill("A", "h1", "2024-02-01", &["R1", "R1"]);
    h.api.set_roll_call("R1", "A", "2024-02-01", Some("NV"));

    let votes = h.sync.sync(&legislator()).await.unwrap();
    assert_eq!(positions(&votes), vec![("R1".to_string(), Position::NotVoting)]);
}

#[tokio::test]
async fn bill_without_roll_calls_contributes_nothing() {
    let h = harness();
    h.api.set_bill("A", "h1", "2024-02-01", &[]);

    let votes = h.sync.sync(&legislator()).await.unwrap();
    assert!(votes.is_empty());
    assert_eq!(
        stored_hashes(&h).await.get("A").map(String::as_str),
        Some("h1")
    );
}

#[tokio::test]
async fn unknown_vote_text_passes_through() {
    let h = harness();
    h.api.set_bill("A", "h1", "2024-02-01", &["R1"]);
    h.api.set_roll_call("R1", "A", "2024-02-01", Some("Excused"));

    let votes = h.sync.sync(&legislator()).await.unwrap();
    assert_eq!(votes[0].position, Position::Other("Excused".to_string()));
}

#[tokio::test]
async fn index_failure_returns_stored_votes() {
    let h = harness();
    seed_two_bills(&h);
    let first = h.sync.sync(&legislator()).await.unwrap();

    h.api.upstream.lock().index_fails = true;
    a_day_later(&h);
    let report = h.sync.sync_report(&legislator()).await.unwrap();

    assert!(!report.from_cache);
    assert_eq!(report.votes, first);
}

#[tokio::test]
async fn unmatched_legislator_is_unavailable() {
    let h = harness();
    seed_two_bills(&h);
    let stranger = Legislator {
        full_name: "Someone Else".to_string(),
        ..legislator()
    };
    assert!(h.sync.sync(&stranger).await.is_none());
    assert!(!h.api.calls().iter().any(|c| c.starts_with("index:")));
}

#[tokio::test]
async fn session_failure_is_unavailable() {
    let h = harness();
    h.api.upstream.lock().sessions_fail = true;
    assert!(h.sync.sync(&legislator()).await.is_none());
}

#[tokio::test]
async fn disabled_synchronizer_is_unavailable() {
    let cache = Arc::new(MemoryCache::new());
    let sync = VoteSynchronizer::disabled(cache.clone(), &SyncConfig::default());
    assert!(!sync.is_enabled());
    assert!(sync.sync(&legislator()).await.is_none());
    assert!(cache.keys().is_empty());
}

#[tokio::test]
async fn sessions_and_roster_are_cached_for_a_week() {
    let h = harness();
    seed_two_bills(&h);
    h.sync.sync(&legislator()).await.unwrap();
    a_day_later(&h);
    h.sync.sync(&legislator()).await.unwrap();

    let calls = h.api.calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("sessions:")).count(), 1);
    assert_eq!(calls.iter().filter(|c| c.starts_with("roster:")).count(), 1);

    h.clock.advance(Duration::from_secs(7 * 24 * 3600));
    h.sync.sync(&legislator()).await.unwrap();
    let calls = h.api.calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("sessions:")).count(), 2);
}

#[tokio::test]
async fn concurrent_syncs_for_one_legislator_share_work() {
    let h = harness();
    seed_two_bills(&h);
    let who = legislator();

    let (a, b) = tokio::join!(h.sync.sync_report(&who), h.sync.sync_report(&who));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.votes, b.votes);
    assert!(a.from_cache != b.from_cache);
    // sessions, roster, index, two bills, two roll calls
    assert_eq!(h.sync.remote_calls(), 7);
}

#[tokio::test]
async fn every_remote_call_waits_on_the_gate() {
    let h = harness();
    seed_two_bills(&h);
    h.sync.sync(&legislator()).await.unwrap();

    let sleeps = h.clock.sleeps();
    assert_eq!(sleeps.len() as u64, h.sync.remote_calls() - 1);
    assert!(sleeps.iter().all(|d| *d <= Duration::from_millis(1100)));
}

#[tokio::test]
async fn hash_index_never_loses_bills() {
    let h = harness();
    seed_two_bills(&h);
    h.sync.sync(&legislator()).await.unwrap();

    // B disappears from the index; its hash stays.
    h.api.upstream.lock().index.retain(|b| b.bill_id != "B");
    a_day_later(&h);
    let votes = h.sync.sync(&legislator()).await.unwrap();

    assert_eq!(positions(&votes), vec![("R1".to_string(), Position::Yea)]);
    assert_eq!(
        stored_hashes(&h).await.get("B").map(String::as_str),
        Some("h2")
    );
}

#[tokio::test]
async fn empty_roster_is_not_cached() {
    let h = harness();
    seed_two_bills(&h);
    h.api.upstream.lock().roster_empty = true;

    assert!(h.sync.sync(&legislator()).await.is_none());
    assert!(!h.cache.keys().contains(&keys::roster(SESSION)));

    h.api.upstream.lock().roster_empty = false;
    a_day_later(&h);
    let votes = h.sync.sync(&legislator()).await.unwrap();

    assert_eq!(positions(&votes), vec![("R1".to_string(), Position::Yea)]);
    let calls = h.api.calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("roster:")).count(), 2);
}

#[tokio::test]
async fn roll_call_without_member_votes_is_retried() {
    let h = harness();
    seed_two_bills(&h);
    h.api.truncate_roll_call("R1");

    let report = h.sync.sync_report(&legislator()).await.unwrap();
    assert!(report.votes.is_empty());
    assert_eq!(report.bills_failed, 1);
    assert!(!h.cache.keys().contains(&keys::rollcall("R1")));
    assert!(!stored_hashes(&h).await.contains_key("A"));

    h.api.set_bill("A", "h2", "2024-02-01", &["R1"]);
    h.api.set_roll_call("R1", "A", "2024-02-01", Some("Yea"));
    a_day_later(&h);
    let votes = h.sync.sync(&legislator()).await.unwrap();

    assert_eq!(positions(&votes), vec![("R1".to_string(), Position::Yea)]);
    assert_eq!(
        stored_hashes(&h).await.get("A").map(String::as_str),
        Some("h2")
    );
}

#[tokio::test]
async fn ledger_is_stored_in_its_public_shape() {
    let h = harness();
    seed_two_bills(&h);
    let votes = h.sync.sync(&legislator()).await.unwrap();

    let ledger = db::load::<RollCallLedger>(h.cache.as_ref(), &keys::rollcalls("leg-1"))
        .await
        .unwrap()
        .unwrap();
    // R2 is marked even though she sat it out
    assert_eq!(
        ledger.fetched_roll_call_ids.iter().collect::<Vec<_>>(),
        vec!["R1", "R2"]
    );
    assert_eq!(ledger.votes, votes);
}
