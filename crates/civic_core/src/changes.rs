use std::collections::BTreeSet;

use crate::api::LegislativeApi;
use crate::error::ApiResult;
use crate::schema::{BillHashEntry, HashIndex};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed_bills: Vec<BillHashEntry>,
    pub unchanged_bill_ids: BTreeSet<String>,
    /// Prior index overlaid with every hash just observed. Bills missing
    /// from the new index keep their old entry.
    pub fresh_hash_index: HashIndex,
}

pub struct ChangeDetector<'a> {
    api: &'a dyn LegislativeApi,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(api: &'a dyn LegislativeApi) -> Self {
        Self { api }
    }

    pub async fn detect_changes(
        &self,
        session_id: &str,
        prior_hash_index: &HashIndex,
    ) -> ApiResult<ChangeSet> {
        let index = self.api.master_bill_index(session_id).await?;
        let changes = classify(index, prior_hash_index);
        tracing::debug!(
            %session_id,
            changed = changes.changed_bills.len(),
            unchanged = changes.unchanged_bill_ids.len(),
            "bill index diffed"
        );
        Ok(changes)
    }
}

/// First listing of a bill wins; repeats are ignored.
pub fn classify(index: Vec<BillHashEntry>, prior_hash_index: &HashIndex) -> ChangeSet {
    let mut changes = ChangeSet {
        fresh_hash_index: prior_hash_index.clone(),
        ..ChangeSet::default()
    };

    let mut seen = BTreeSet::new();
    for bill in index {
        if bill.bill_id.is_empty() || !seen.insert(bill.bill_id.clone()) {
            continue;
        }
        if prior_hash_index.get(&bill.bill_id) == Some(&bill.change_hash) {
            changes.unchanged_bill_ids.insert(bill.bill_id);
        } else {
            changes
                .fresh_hash_index
                .insert(bill.bill_id.clone(), bill.change_hash.clone());
            changes.changed_bills.push(bill);
        }
    }
    changes
}
