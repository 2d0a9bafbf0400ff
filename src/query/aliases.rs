//! Convenience parameters (`state`, `district`, `gender`, `age_group`, `year`)
//! translated into filter fields for the survey layouts.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::filter::{FilterError, FilterExpr};
use crate::datasets::repo_types::StorageMode;

/// State/UT name to `State_UT_Code`.
pub const STATE_CODES: &[(&str, i64)] = &[
    ("TELANGANA", 36),
    ("ANDHRA PRADESH", 28),
    ("KARNATAKA", 29),
    ("TAMIL NADU", 33),
    ("KERALA", 32),
    ("MAHARASHTRA", 27),
    ("PUNJAB", 3),
    ("HARYANA", 6),
    ("DELHI", 7),
    ("UTTAR PRADESH", 9),
    ("BIHAR", 10),
    ("WEST BENGAL", 19),
    ("GUJARAT", 24),
    ("RAJASTHAN", 8),
];

pub fn state_code(name: &str) -> Option<i64> {
    let upper = name.trim().to_uppercase();
    STATE_CODES
        .iter()
        .find(|(n, _)| *n == upper)
        .map(|(_, code)| *code)
}

/// `Sex` column coding: 1 male, 2 female, 3 transgender.
pub fn sex_code(gender: &str) -> Option<i64> {
    match gender.trim().to_uppercase().as_str() {
        "MALE" | "M" | "1" => Some(1),
        "FEMALE" | "F" | "2" => Some(2),
        "TRANSGENDER" | "T" | "3" => Some(3),
        _ => None,
    }
}

fn is_code(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn age_filter(raw: &str) -> Result<Value, FilterError> {
    let raw = raw.trim();
    let invalid = || FilterError::InvalidAlias {
        param: "age_group",
        value: raw.to_string(),
    };
    if let Some((lo, hi)) = raw.split_once('-') {
        let lo: i64 = lo.trim().parse().map_err(|_| invalid())?;
        let hi: i64 = hi.trim().parse().map_err(|_| invalid())?;
        return Ok(json!({"$gte": lo, "$lte": hi}));
    }
    raw.parse::<i64>().map(Value::from).map_err(|_| invalid())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AliasParams {
    pub state: Option<String>,
    pub district: Option<String>,
    pub gender: Option<String>,
    pub age_group: Option<String>,
    pub year: Option<i64>,
}

impl AliasParams {
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.district.is_none()
            && self.gender.is_none()
            && self.age_group.is_none()
            && self.year.is_none()
    }

    /// Dedicated survey tables use coded columns; generic records keep the
    /// raw values under their lowercase names. Values a coded column cannot
    /// express are dropped.
    pub fn translate(&self, mode: StorageMode) -> Result<FilterExpr, FilterError> {
        let mut map = Map::new();
        match mode {
            StorageMode::DedicatedTable => {
                if let Some(state) = self.state.as_deref() {
                    let code = if is_code(state.trim()) {
                        state.trim().parse().ok()
                    } else {
                        state_code(state)
                    };
                    match code {
                        Some(c) => {
                            map.insert("State_UT_Code".into(), c.into());
                        }
                        None => debug!(state, "unknown state name ignored"),
                    }
                }
                if let Some(district) = self.district.as_deref().map(str::trim) {
                    if let (true, Ok(code)) = (is_code(district), district.parse::<i64>()) {
                        map.insert("District_Code".into(), code.into());
                    }
                }
                if let Some(code) = self.gender.as_deref().and_then(sex_code) {
                    map.insert("Sex".into(), code.into());
                }
                if let Some(age) = self.age_group.as_deref() {
                    map.insert("Age".into(), age_filter(age)?);
                }
            }
            StorageMode::GenericRecords => {
                let pairs = [
                    ("state", &self.state),
                    ("district", &self.district),
                    ("gender", &self.gender),
                    ("age_group", &self.age_group),
                ];
                for (key, value) in pairs {
                    if let Some(v) = value {
                        map.insert(key.into(), Value::String(v.clone()));
                    }
                }
                if let Some(year) = self.year {
                    map.insert("year".into(), year.into());
                }
            }
        }
        FilterExpr::from_map(&map)
    }
}
