//! Section and transaction model.
//!
//! A [`Section`] is a set of [`Transaction`]s keyed by their `hash`. Merging is
//! plain set union: the first transaction seen for an identity is kept and
//! later duplicates are dropped, so merging is idempotent and the resulting
//! set does not depend on merge order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// An opaque ledger record identified by its hash.
///
/// Only `hash` is interpreted; every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content-derived identity
    pub hash: String,

    /// Remaining fields, kept as-is
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Transaction {
    /// Build a transaction with an empty body.
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            body: Map::new(),
        }
    }

    /// Attach an opaque field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }
}

/// One logical shard of ledger data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(
        serialize_with = "serialize_transactions",
        deserialize_with = "deserialize_transactions",
        default
    )]
    transactions: BTreeMap<String, Transaction>,

    /// Section-level fields other than `transactions`
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction. Returns `false` if its identity was already present.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        match self.transactions.entry(tx.hash.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(tx);
                true
            }
        }
    }

    /// Union `other` into `self`, returning how many transactions were new.
    ///
    /// `self`'s section-level fields are kept.
    pub fn merge(&mut self, other: Section) -> usize {
        let mut added = 0;
        for (hash, tx) in other.transactions {
            if let Entry::Vacant(slot) = self.transactions.entry(hash) {
                slot.insert(tx);
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Transactions in identity order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    /// Identities in sorted order.
    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.transactions.keys().map(String::as_str)
    }
}

impl FromIterator<Transaction> for Section {
    fn from_iter<I: IntoIterator<Item = Transaction>>(iter: I) -> Self {
        let mut section = Section::new();
        for tx in iter {
            section.insert(tx);
        }
        section
    }
}

fn serialize_transactions<S>(
    transactions: &BTreeMap<String, Transaction>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(transactions.values())
}

fn deserialize_transactions<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, Transaction>, D::Error>
where
    D: Deserializer<'de>,
{
    let list = Vec::<Transaction>::deserialize(deserializer)?;
    let mut map = BTreeMap::new();
    for tx in list {
        map.entry(tx.hash.clone()).or_insert(tx);
    }
    Ok(map)
}
