use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::warn;

use crate::records::{BarangayKey, BarangayRecord, MunicipalityKey, MunicipalityRecord};

/// One municipality slot. `record` is `None` for a placeholder created when
/// barangays arrived for a key the list pages never produced.
#[derive(Debug, Clone, Default)]
pub struct MunicipalityEntry {
    pub record: Option<MunicipalityRecord>,
    pub barangays: BTreeMap<BarangayKey, BarangayRecord>,
}

/// Where a municipality's barangays come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailTarget {
    pub key: MunicipalityKey,
    pub muni_name: String,
    pub href: String,
}

/// Two-level accumulation of a crawl, iterated in key order.
#[derive(Debug, Default)]
pub struct RecordStore {
    municipalities: BTreeMap<MunicipalityKey, MunicipalityEntry>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins. Barangays already nested under the key are kept.
    /// Returns true when an existing record was replaced.
    pub fn upsert_municipality(&mut self, record: MunicipalityRecord) -> bool {
        let entry = self.municipalities.entry(record.key()).or_default();
        entry.record.replace(record).is_some()
    }

    /// Creates a placeholder slot when `muni` is unknown so no barangay is dropped.
    pub fn insert_barangay(&mut self, muni: &MunicipalityKey, record: BarangayRecord) {
        let entry = match self.municipalities.entry(muni.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                warn!(municipality = %muni, "barangay for unknown municipality, adding placeholder");
                e.insert(MunicipalityEntry::default())
            }
        };
        entry.barangays.insert(record.key(), record);
    }

    #[cfg(test)]
    pub fn get(&self, key: &MunicipalityKey) -> Option<&MunicipalityEntry> {
        self.municipalities.get(key)
    }

    /// Sorted by key.
    pub fn municipalities(&self) -> impl Iterator<Item = (&MunicipalityKey, &MunicipalityEntry)> {
        self.municipalities.iter()
    }

    /// One target per municipality with a known detail link, in key order.
    pub fn detail_targets(&self) -> Vec<DetailTarget> {
        self.municipalities
            .iter()
            .filter_map(|(key, entry)| {
                let rec = entry.record.as_ref()?;
                Some(DetailTarget {
                    key: key.clone(),
                    muni_name: rec.name.clone(),
                    href: rec.href.clone(),
                })
            })
            .collect()
    }

    pub fn municipality_count(&self) -> usize {
        self.municipalities.len()
    }

    pub fn barangay_count(&self) -> usize {
        self.municipalities.values().map(|e| e.barangays.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.municipalities.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn muni(name: &str, code: &str, province: &str) -> MunicipalityRecord {
        MunicipalityRecord {
            name: name.into(),
            code: code.into(),
            href: format!("municipality.asp?muncode={code}"),
            province: province.into(),
            income_class: "1st".into(),
            registered_voters: "100".into(),
            population: "200".into(),
            land_area: "30".into(),
        }
    }

    pub fn brgy(muni_name: &str, name: &str, code: &str) -> BarangayRecord {
        BarangayRecord {
            muni_name: muni_name.into(),
            name: name.into(),
            code: code.into(),
            urban_rural: "Rural".into(),
            population: "50".into(),
        }
    }

    #[test]
    fn same_key_keeps_last_write() {
        let mut store = RecordStore::new();
        assert!(!store.upsert_municipality(muni("Adams", "01", "Ilocos Norte")));
        assert!(store.upsert_municipality(muni("Adams", "01", "Ilocos Sur")));

        assert_eq!(store.municipality_count(), 1);
        let key = muni("Adams", "01", "").key();
        let rec = store.get(&key).unwrap().record.as_ref().unwrap();
        assert_eq!(rec.province, "Ilocos Sur");
    }

    #[test]
    fn overwrite_keeps_nested_barangays() {
        let mut store = RecordStore::new();
        let m = muni("Adams", "01", "A");
        store.upsert_municipality(m.clone());
        store.insert_barangay(&m.key(), brgy("Adams", "Bacsil", "001"));
        store.upsert_municipality(muni("Adams", "01", "B"));
        assert_eq!(store.barangay_count(), 1);
    }

    #[test]
    fn barangays_are_scoped_per_municipality() {
        let mut store = RecordStore::new();
        let a = muni("Adams", "01", "P");
        let b = muni("Bangui", "02", "P");
        store.upsert_municipality(a.clone());
        store.upsert_municipality(b.clone());
        store.insert_barangay(&a.key(), brgy("Adams", "Poblacion", "001"));
        store.insert_barangay(&b.key(), brgy("Bangui", "Poblacion", "001"));

        assert_eq!(store.barangay_count(), 2);
        for (key, entry) in store.municipalities() {
            let only = entry.barangays.values().next().unwrap();
            assert_eq!(only.muni_name, key.name);
        }
    }

    #[test]
    fn unknown_municipality_gets_placeholder() {
        let mut store = RecordStore::new();
        let ghost = muni("Ghost", "99", "");
        store.insert_barangay(&ghost.key(), brgy("Ghost", "Centro", "001"));

        let entry = store.get(&ghost.key()).unwrap();
        assert!(entry.record.is_none());
        assert_eq!(entry.barangays.len(), 1);
        assert!(store.detail_targets().is_empty());
    }

    #[test]
    fn iteration_is_sorted_regardless_of_insert_order() {
        let mut store = RecordStore::new();
        for (name, code) in [("Pasuquin", "3"), ("Adams", "1"), ("Batac", "2"), ("Adams", "0")] {
            store.upsert_municipality(muni(name, code, "P"));
        }
        let order: Vec<String> = store.municipalities().map(|(k, _)| k.to_string()).collect();
        assert_eq!(order, vec!["Adams-0", "Adams-1", "Batac-2", "Pasuquin-3"]);

        let targets = store.detail_targets();
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0].href, "municipality.asp?muncode=0");
    }
}
