use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{ApiError, ApiResult};
use crate::rate_gate::RateGate;
use crate::schema::{BillDetail, BillHashEntry, RollCall, RollCallRef, RosterEntry, Session, Tallies};

/// The five remote operations the vote sync consumes.
#[async_trait]
pub trait LegislativeApi: Send + Sync {
    async fn list_sessions(&self, jurisdiction: &str) -> ApiResult<Vec<Session>>;

    async fn session_roster(&self, session_id: &str) -> ApiResult<Vec<RosterEntry>>;

    async fn master_bill_index(&self, session_id: &str) -> ApiResult<Vec<BillHashEntry>>;

    async fn bill_detail(&self, bill_id: &str) -> ApiResult<BillDetail>;

    async fn roll_call_detail(&self, roll_call_id: &str) -> ApiResult<RollCall>;
}

pub struct LegiScanClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LegiScanClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Returns `Ok(None)` when no API key is configured.
    pub fn from_config(config: &SyncConfig) -> ApiResult<Option<Self>> {
        let Some(api_key) = config.resolved_api_key() else {
            tracing::debug!("LEGISCAN_API_KEY not set, vote sync unavailable");
            return Ok(None);
        };
        Self::new(&config.base_url, api_key, config.request_timeout()).map(Some)
    }

    async fn call(&self, operation: &str, params: &[(&str, &str)]) -> ApiResult<Value> {
        let mut query: Vec<(&str, &str)> = vec![("key", self.api_key.as_str()), ("op", operation)];
        query.extend_from_slice(params);

        let response = self
            .http_client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::ApiStatus {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::parse(operation, e.to_string()))?;
        check_envelope(operation, body)
    }
}

impl std::fmt::Debug for LegiScanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegiScanClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LegislativeApi for LegiScanClient {
    async fn list_sessions(&self, jurisdiction: &str) -> ApiResult<Vec<Session>> {
        let body = self.call("getSessionList", &[("state", jurisdiction)]).await?;
        parse_sessions(jurisdiction, &body)
    }

    async fn session_roster(&self, session_id: &str) -> ApiResult<Vec<RosterEntry>> {
        let body = self.call("getSessionPeople", &[("id", session_id)]).await?;
        parse_roster(&body)
    }

    async fn master_bill_index(&self, session_id: &str) -> ApiResult<Vec<BillHashEntry>> {
        let body = self.call("getMasterListRaw", &[("id", session_id)]).await?;
        parse_master_list(&body)
    }

    async fn bill_detail(&self, bill_id: &str) -> ApiResult<BillDetail> {
        let body = self.call("getBill", &[("id", bill_id)]).await?;
        parse_bill(&body)
    }

    async fn roll_call_detail(&self, roll_call_id: &str) -> ApiResult<RollCall> {
        let body = self.call("getRollCall", &[("id", roll_call_id)]).await?;
        parse_roll_call(&body)
    }
}

/// Routes every call through a [`RateGate`], bounds it with a timeout and
/// counts it against the quota.
pub struct GatedApi {
    inner: Arc<dyn LegislativeApi>,
    gate: Arc<RateGate>,
    timeout: Duration,
    calls: AtomicU64,
}

impl GatedApi {
    pub fn new(inner: Arc<dyn LegislativeApi>, gate: Arc<RateGate>, timeout: Duration) -> Self {
        Self {
            inner,
            gate,
            timeout,
            calls: AtomicU64::new(0),
        }
    }

    /// Remote calls issued through this gate so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn gated<T>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = ApiResult<T>>,
    ) -> ApiResult<T> {
        self.gate.acquire().await;
        self.calls.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                operation: operation.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl LegislativeApi for GatedApi {
    async fn list_sessions(&self, jurisdiction: &str) -> ApiResult<Vec<Session>> {
        self.gated("list-sessions", self.inner.list_sessions(jurisdiction))
            .await
    }

    async fn session_roster(&self, session_id: &str) -> ApiResult<Vec<RosterEntry>> {
        self.gated("session-roster", self.inner.session_roster(session_id))
            .await
    }

    async fn master_bill_index(&self, session_id: &str) -> ApiResult<Vec<BillHashEntry>> {
        self.gated("master-bill-index", self.inner.master_bill_index(session_id))
            .await
    }

    async fn bill_detail(&self, bill_id: &str) -> ApiResult<BillDetail> {
        self.gated("bill-detail", self.inner.bill_detail(bill_id)).await
    }

    async fn roll_call_detail(&self, roll_call_id: &str) -> ApiResult<RollCall> {
        self.gated("roll-call-detail", self.inner.roll_call_detail(roll_call_id))
            .await
    }
}

fn check_envelope(operation: &str, body: Value) -> ApiResult<Value> {
    match body.get("status").and_then(Value::as_str) {
        Some("OK") => Ok(body),
        Some(_) => {
            let message = body
                .pointer("/alert/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Err(ApiError::Rejected {
                operation: operation.to_string(),
                message,
            })
        }
        None => Err(ApiError::parse(operation, "missing status field")),
    }
}

/// Ids arrive as numbers or strings depending on the endpoint.
fn id_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn int_field(value: &Value, field: &str) -> Option<i64> {
    match value.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn count_field(value: &Value, field: &str) -> u32 {
    int_field(value, field)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Lists are sometimes arrays and sometimes objects keyed "0", "1", ...
fn list_entries<'a>(value: &'a Value) -> Vec<&'a Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().filter(|v| v.is_object()).collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn parse_sessions(jurisdiction: &str, body: &Value) -> ApiResult<Vec<Session>> {
    let sessions = body
        .get("sessions")
        .ok_or_else(|| ApiError::parse("list-sessions", "missing sessions"))?;

    Ok(list_entries(sessions)
        .into_iter()
        .filter_map(|entry| {
            Some(Session {
                session_id: id_field(entry, "session_id")?,
                jurisdiction: jurisdiction.to_uppercase(),
                name: str_field(entry, "session_name").or_else(|| str_field(entry, "session_title")),
                year_start: int_field(entry, "year_start").unwrap_or(0) as i32,
                year_end: int_field(entry, "year_end").unwrap_or(0) as i32,
                is_special: int_field(entry, "special").unwrap_or(0) != 0,
            })
        })
        .collect())
}

pub(crate) fn parse_roster(body: &Value) -> ApiResult<Vec<RosterEntry>> {
    let people = body
        .pointer("/sessionpeople/people")
        .ok_or_else(|| ApiError::parse("session-roster", "missing sessionpeople.people"))?;

    Ok(list_entries(people)
        .into_iter()
        .filter_map(|entry| {
            let first_name = str_field(entry, "first_name").unwrap_or_default();
            let last_name = str_field(entry, "last_name").unwrap_or_default();
            let full_name = str_field(entry, "name")
                .unwrap_or_else(|| format!("{first_name} {last_name}").trim().to_string());
            Some(RosterEntry {
                person_id: id_field(entry, "people_id")?,
                full_name,
                first_name,
                last_name,
                chamber_role: str_field(entry, "role"),
                party: str_field(entry, "party"),
                district: str_field(entry, "district"),
            })
        })
        .collect())
}

pub(crate) fn parse_master_list(body: &Value) -> ApiResult<Vec<BillHashEntry>> {
    let masterlist = body
        .get("masterlist")
        .ok_or_else(|| ApiError::parse("master-bill-index", "missing masterlist"))?;

    Ok(list_entries(masterlist)
        .into_iter()
        // the "session" header is an object too, but carries no bill_id;
        // entries without a hash can never be diffed
        .filter_map(|entry| {
            Some(BillHashEntry {
                bill_id: id_field(entry, "bill_id")?,
                display_number: str_field(entry, "number").unwrap_or_default(),
                title: str_field(entry, "title"),
                change_hash: str_field(entry, "change_hash")?,
                last_action_date: str_field(entry, "last_action_date")
                    .or_else(|| str_field(entry, "status_date")),
            })
        })
        .collect())
}

pub(crate) fn parse_bill(body: &Value) -> ApiResult<BillDetail> {
    let bill = body
        .get("bill")
        .ok_or_else(|| ApiError::parse("bill-detail", "missing bill"))?;
    let bill_id = id_field(bill, "bill_id")
        .ok_or_else(|| ApiError::parse("bill-detail", "missing bill_id"))?;

    let roll_calls = bill
        .get("votes")
        .map(list_entries)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|vote| {
            Some(RollCallRef {
                roll_call_id: id_field(vote, "roll_call_id")?,
                date: str_field(vote, "date").unwrap_or_default(),
                description: str_field(vote, "desc").unwrap_or_default(),
            })
        })
        .collect();

    Ok(BillDetail {
        bill_id,
        display_number: str_field(bill, "bill_number").unwrap_or_default(),
        title: str_field(bill, "title"),
        roll_calls,
    })
}

pub(crate) fn parse_roll_call(body: &Value) -> ApiResult<RollCall> {
    let roll_call = body
        .get("roll_call")
        .ok_or_else(|| ApiError::parse("roll-call-detail", "missing roll_call"))?;
    let roll_call_id = id_field(roll_call, "roll_call_id")
        .ok_or_else(|| ApiError::parse("roll-call-detail", "missing roll_call_id"))?;

    let votes = match roll_call.get("votes") {
        Some(votes @ (Value::Array(_) | Value::Object(_))) => list_entries(votes),
        _ => return Err(ApiError::parse("roll-call-detail", "missing votes list")),
    };
    let mut per_person_votes = BTreeMap::new();
    for vote in votes {
        let (Some(person_id), Some(text)) = (id_field(vote, "people_id"), str_field(vote, "vote_text"))
        else {
            continue;
        };
        per_person_votes.insert(person_id, text);
    }

    let passed = match roll_call.get("passed") {
        None | Some(Value::Null) => None,
        Some(_) => int_field(roll_call, "passed").map(|n| n != 0),
    };

    Ok(RollCall {
        roll_call_id,
        bill_id: id_field(roll_call, "bill_id").unwrap_or_default(),
        date: str_field(roll_call, "date").unwrap_or_default(),
        description: str_field(roll_call, "desc").unwrap_or_default(),
        chamber: str_field(roll_call, "chamber"),
        tallies: Tallies {
            yea: count_field(roll_call, "yea"),
            nay: count_field(roll_call, "nay"),
            not_voting: count_field(roll_call, "nv"),
            absent: count_field(roll_call, "absent"),
        },
        passed,
        per_person_votes,
    })
}
