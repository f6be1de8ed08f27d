use std::fmt;

use serde::Serialize;

use crate::error::RowError;
use crate::extract::FieldMap;

/// Municipalities are identified by display name plus PSGC code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MunicipalityKey {
    pub name: String,
    pub code: String,
}

/// Unique only within the owning municipality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BarangayKey {
    pub name: String,
    pub code: String,
}

impl fmt::Display for MunicipalityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.code)
    }
}

impl fmt::Display for BarangayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.code)
    }
}

/// Numeric-looking fields are kept as strings with separators removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MunicipalityRecord {
    pub name: String,
    pub code: String,
    pub href: String,
    pub province: String,
    pub income_class: String,
    pub registered_voters: String,
    pub population: String,
    pub land_area: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarangayRecord {
    pub muni_name: String,
    pub name: String,
    pub code: String,
    pub urban_rural: String,
    pub population: String,
}

fn key_field(fields: &FieldMap, field: &'static str) -> Result<String, RowError> {
    let v = fields.get(field);
    if v.is_empty() {
        return Err(RowError::EmptyField(field));
    }
    Ok(v.to_string())
}

impl MunicipalityRecord {
    pub fn from_fields(fields: &FieldMap) -> Result<Self, RowError> {
        let name = key_field(fields, "name")?;
        let code = key_field(fields, "code")?;
        let href = fields
            .link
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or(RowError::MissingLink("name"))?;

        Ok(MunicipalityRecord {
            name,
            code,
            href,
            province: fields.get("province").to_string(),
            income_class: fields.get("income_class").to_string(),
            registered_voters: fields.get("registered_voters").to_string(),
            population: fields.get("population").to_string(),
            land_area: fields.get("land_area").to_string(),
        })
    }

    pub fn key(&self) -> MunicipalityKey {
        MunicipalityKey { name: self.name.clone(), code: self.code.clone() }
    }
}

impl BarangayRecord {
    pub fn from_fields(fields: &FieldMap, muni_name: &str) -> Result<Self, RowError> {
        Ok(BarangayRecord {
            muni_name: muni_name.to_string(),
            name: key_field(fields, "name")?,
            code: key_field(fields, "code")?,
            urban_rural: fields.get("urban_rural").to_string(),
            population: fields.get("population").to_string(),
        })
    }

    pub fn key(&self) -> BarangayKey {
        BarangayKey { name: self.name.clone(), code: self.code.clone() }
    }
}
