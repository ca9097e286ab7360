//! Product catalog: one record per distinct product tuple, keyed by a dense
//! surrogate id assigned in first-seen order.

use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;

use crate::calendar::TimedEvent;
use crate::events::{columns, ProductKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueProductId(u32);

impl UniqueProductId {
    pub fn new(value: u32) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UniqueProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniqueProductId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "0".parse::<NonZeroU32>() gives a ParseIntError we can hand back.
        let value = s.trim().parse::<std::num::NonZeroU32>()?;
        Ok(Self(value.get()))
    }
}

impl Serialize for UniqueProductId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UniqueProductId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub unique_product_id: UniqueProductId,
    pub key: ProductKey,
    pub title_parts: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    records: Vec<ProductRecord>,
    index: HashMap<ProductKey, UniqueProductId>,
    title_width: usize,
}

impl ProductCatalog {
    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn title_width(&self) -> usize {
        self.title_width
    }

    pub fn title_part_columns(&self) -> Vec<String> {
        (0..self.title_width)
            .map(|idx| format!("{}{idx}", columns::TITLE_PART_PREFIX))
            .collect()
    }

    pub fn resolve(&self, key: &ProductKey) -> Option<UniqueProductId> {
        self.index.get(key).copied()
    }

    pub fn product_ids(&self) -> impl Iterator<Item = UniqueProductId> + '_ {
        self.records.iter().map(|record| record.unique_product_id)
    }
}

pub fn tokenize_title(title: &str) -> Vec<&str> {
    title.split_whitespace().collect()
}

pub fn extract_catalog(events: &[TimedEvent]) -> ProductCatalog {
    extract_catalog_from_keys(events.iter().map(|event| &event.raw.product))
}

pub fn extract_catalog_from_keys<'a>(
    keys: impl IntoIterator<Item = &'a ProductKey>,
) -> ProductCatalog {
    let mut index: HashMap<ProductKey, UniqueProductId> = HashMap::new();
    let mut distinct: Vec<&ProductKey> = Vec::new();
    let mut seen_events = 0usize;

    for key in keys {
        seen_events += 1;
        if index.contains_key(key) {
            continue;
        }
        let next = UniqueProductId(distinct.len() as u32 + 1);
        index.insert(key.clone(), next);
        distinct.push(key);
    }

    let title_width = distinct
        .iter()
        .map(|key| tokenize_title(&key.title).len())
        .max()
        .unwrap_or(0);

    let records: Vec<ProductRecord> = distinct
        .into_iter()
        .enumerate()
        .map(|(position, key)| {
            let tokens = tokenize_title(&key.title);
            let title_parts = (0..title_width)
                .map(|idx| tokens.get(idx).map(|token| token.to_string()))
                .collect();
            ProductRecord {
                unique_product_id: UniqueProductId(position as u32 + 1),
                key: key.clone(),
                title_parts,
            }
        })
        .collect();

    info!(
        component = "catalog",
        event = "catalog.extract.finish",
        events = seen_events,
        distinct_products = records.len(),
        title_width
    );

    ProductCatalog {
        records,
        index,
        title_width,
    }
}
