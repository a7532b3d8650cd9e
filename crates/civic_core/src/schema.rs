use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bill id -> last observed change hash.
pub type HashIndex = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    pub session_id: String,
    pub jurisdiction: String, // two-letter state code, e.g. "KY"
    pub name: Option<String>,
    pub year_start: i32,
    pub year_end: i32,
    pub is_special: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RosterEntry {
    pub person_id: String, // remote namespace
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub chamber_role: Option<String>, // "Rep", "Sen"
    pub party: Option<String>,
    pub district: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BillHashEntry {
    pub bill_id: String,
    pub display_number: String,
    pub title: Option<String>,
    pub change_hash: String,
    pub last_action_date: Option<String>, // YYYY-MM-DD
}

/// A roll call as enumerated by bill detail, before its tally is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RollCallRef {
    pub roll_call_id: String,
    pub date: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BillDetail {
    pub bill_id: String,
    pub display_number: String,
    pub title: Option<String>,
    pub roll_calls: Vec<RollCallRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Tallies {
    pub yea: u32,
    pub nay: u32,
    pub not_voting: u32,
    pub absent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RollCall {
    pub roll_call_id: String,
    pub bill_id: String,
    pub date: String,
    pub description: String,
    pub chamber: Option<String>,
    pub tallies: Tallies,
    pub passed: Option<bool>,
    pub per_person_votes: BTreeMap<String, String>, // person id -> raw vote text
}

impl RollCall {
    pub fn result_label(&self) -> &'static str {
        match self.passed {
            Some(true) => "Passed",
            Some(false) => "Failed",
            None => "",
        }
    }
}

/// Canonical vote position. Anything unrecognised is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Position {
    Yea,
    Nay,
    NotVoting,
    Present,
    Other(String),
}

impl Position {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim() {
            "Yea" => Position::Yea,
            "Nay" => Position::Nay,
            "NV" | "Absent" => Position::NotVoting,
            "Present" => Position::Present,
            _ => Position::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Position::Yea => "Yea",
            Position::Nay => "Nay",
            Position::NotVoting => "NotVoting",
            Position::Present => "Present",
            Position::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Position {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl JsonSchema for Position {
    fn schema_name() -> String {
        "Position".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "Yea" => Position::Yea,
            "Nay" => Position::Nay,
            "NotVoting" => Position::NotVoting,
            "Present" => Position::Present,
            _ => Position::Other(raw),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoteRecord {
    pub roll_number: String,
    pub question: String,
    pub date: String,
    pub result: String, // "Passed", "Failed" or ""
    pub position: Position,
    pub bill_number: String,
    pub bill_title: Option<String>,
    pub chamber: Option<String>,
    pub yea_count: u32,
    pub nay_count: u32,
    pub not_voting_count: u32,
    pub source_roll_call_id: String,
    pub source_bill_id: String,
}

impl VoteRecord {
    /// Builds this legislator's view of a roll call, or `None` if they
    /// have no entry in its per-person votes.
    pub fn from_roll_call(roll_call: &RollCall, bill: &BillDetail, person_id: &str) -> Option<Self> {
        let raw = roll_call.per_person_votes.get(person_id)?;
        Some(Self {
            roll_number: roll_call.roll_call_id.clone(),
            question: roll_call.description.clone(),
            date: roll_call.date.clone(),
            result: roll_call.result_label().to_string(),
            position: Position::from_raw(raw),
            bill_number: bill.display_number.clone(),
            bill_title: bill.title.clone(),
            chamber: roll_call.chamber.clone(),
            yea_count: roll_call.tallies.yea,
            nay_count: roll_call.tallies.nay,
            not_voting_count: roll_call.tallies.not_voting + roll_call.tallies.absent,
            source_roll_call_id: roll_call.roll_call_id.clone(),
            source_bill_id: roll_call.bill_id.clone(),
        })
    }
}

/// Newest first; ties broken by roll call id so output is stable.
pub fn sort_votes(votes: &mut [VoteRecord]) {
    votes.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.source_roll_call_id.cmp(&a.source_roll_call_id))
    });
}

/// Who to sync. `id` is the caller's own identifier, not the remote one.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Legislator {
    pub id: String,
    pub full_name: String,
    pub last_name: Option<String>,
    pub jurisdiction: String,
}

/// Per-legislator sync state, stored under `rollcalls:{legislator}`. The
/// bill hash index lives beside it under `hashes:{session}:{legislator}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RollCallLedger {
    pub fetched_roll_call_ids: BTreeSet<String>, // includes roll calls the legislator sat out
    pub votes: Vec<VoteRecord>,
}
