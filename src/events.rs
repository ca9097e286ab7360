//! Raw advertising events as delivered by the partner feed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

pub mod columns {
    pub const CLICK_TIMESTAMP: &str = "click_timestamp";
    pub const PRODUCT_ID: &str = "product_id";
    pub const PRODUCT_BRAND: &str = "product_brand";
    pub const PRODUCT_AGE_GROUP: &str = "product_age_group";
    pub const PRODUCT_GENDER: &str = "product_gender";
    pub const PRODUCT_CATEGORY_1: &str = "product_category_1";
    pub const PRODUCT_CATEGORY_2: &str = "product_category_2";
    pub const PRODUCT_CATEGORY_3: &str = "product_category_3";
    pub const PRODUCT_CATEGORY_4: &str = "product_category_4";
    pub const PRODUCT_CATEGORY_5: &str = "product_category_5";
    pub const PRODUCT_CATEGORY_6: &str = "product_category_6";
    pub const PRODUCT_CATEGORY_7: &str = "product_category_7";
    pub const PRODUCT_TITLE: &str = "product_title";
    pub const SALES_AMOUNT: &str = "sales_amount";
    pub const PRODUCT_PRICE: &str = "product_price";
    pub const DEVICE_TYPE: &str = "device_type";
    pub const AUDIENCE_ID: &str = "audience_id";

    pub const UNIQUE_PRODUCT_ID: &str = "unique_product_id";
    pub const DATE: &str = "date";
    pub const DAY_OF_CAMPAIGN: &str = "day_of_campaign";
    pub const TOTAL_SALES_AMOUNT: &str = "total_sales_amount";
    pub const NUMBER_OF_CLICKS: &str = "number_of_clicks";
    pub const PRODUCT_DAY_ID: &str = "product_day_id";
    pub const PRODUCT_DAY_INDEX: &str = "product_day_index";
    pub const TITLE_PART_PREFIX: &str = "product_title_part_";

    pub const PRODUCT_CATEGORIES: [&str; 7] = [
        PRODUCT_CATEGORY_1,
        PRODUCT_CATEGORY_2,
        PRODUCT_CATEGORY_3,
        PRODUCT_CATEGORY_4,
        PRODUCT_CATEGORY_5,
        PRODUCT_CATEGORY_6,
        PRODUCT_CATEGORY_7,
    ];

    pub const PRODUCT_COLUMNS: [&str; 12] = [
        PRODUCT_ID,
        PRODUCT_BRAND,
        PRODUCT_AGE_GROUP,
        PRODUCT_GENDER,
        PRODUCT_CATEGORY_1,
        PRODUCT_CATEGORY_2,
        PRODUCT_CATEGORY_3,
        PRODUCT_CATEGORY_4,
        PRODUCT_CATEGORY_5,
        PRODUCT_CATEGORY_6,
        PRODUCT_CATEGORY_7,
        PRODUCT_TITLE,
    ];

    pub const REQUIRED_COLUMNS: [&str; 17] = [
        CLICK_TIMESTAMP,
        PRODUCT_ID,
        PRODUCT_BRAND,
        PRODUCT_AGE_GROUP,
        PRODUCT_GENDER,
        PRODUCT_CATEGORY_1,
        PRODUCT_CATEGORY_2,
        PRODUCT_CATEGORY_3,
        PRODUCT_CATEGORY_4,
        PRODUCT_CATEGORY_5,
        PRODUCT_CATEGORY_6,
        PRODUCT_CATEGORY_7,
        PRODUCT_TITLE,
        SALES_AMOUNT,
        PRODUCT_PRICE,
        DEVICE_TYPE,
        AUDIENCE_ID,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductKey {
    pub product_id: String,
    pub brand: String,
    pub age_group: String,
    pub gender: String,
    pub categories: [String; 7],
    pub title: String,
}

impl ProductKey {
    pub fn values(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(columns::PRODUCT_COLUMNS.len());
        out.push(self.product_id.as_str());
        out.push(self.brand.as_str());
        out.push(self.age_group.as_str());
        out.push(self.gender.as_str());
        out.extend(self.categories.iter().map(String::as_str));
        out.push(self.title.as_str());
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub click_timestamp: FieldValue,
    pub product: ProductKey,
    pub sales_amount: FieldValue,
    pub product_price: FieldValue,
    pub device_type: String,
    pub audience_id: String,
}

pub fn check_required_columns<'a>(
    present: impl IntoIterator<Item = &'a str>,
) -> Result<(), EngineError> {
    let present: Vec<&str> = present.into_iter().map(str::trim).collect();
    let missing: Vec<String> = columns::REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !present.contains(required))
        .map(|required| required.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Schema { missing })
    }
}
