//! In-memory replica: the merged view of every scan the fleet has accepted.
//!
//! Mathematically a G-Set keyed by `scan_id`, partitioned per code.  The
//! per-code vec sorted by `(ts_ms, device_id)` is a cached presentational
//! view; membership is decided solely by the id index.  The pass-type
//! projection (kind, per-day flags, counter) lives alongside and is rebuilt
//! deterministically from the scan log union the snapshot defaults.

use crate::clock::IdSource;
use crate::config::{ConfigSnapshot, PassConfig};
use gm_protocol::{CodeState, FullState, PassKind, ScanRecord};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Projection entry for one code.
#[derive(Debug, Clone, PartialEq)]
pub struct PassEntry {
    pub kind: PassKind,
    pub day_flags: Option<BTreeMap<String, bool>>,
    /// Total events observed for this code, across all days and devices.
    pub count: u64,
}

#[derive(Debug, Default)]
struct CodeLog {
    /// Kept sorted by `(ts_ms, device_id)` after every merge.
    scans: Vec<ScanRecord>,
    ids: HashSet<Uuid>,
}

/// The full in-memory projection for one device.
#[derive(Debug, Default)]
pub struct ReplicaState {
    passes: BTreeMap<String, PassEntry>,
    log: BTreeMap<String, CodeLog>,
}

impl ReplicaState {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Projection seeding
    // -----------------------------------------------------------------------

    /// Seed a pass declaration if the code is not yet projected.
    pub fn seed_pass(&mut self, code: &str, entry: PassEntry) {
        self.passes.entry(code.to_owned()).or_insert(entry);
    }

    /// Seed every pass from a config snapshot (existing entries win).
    pub fn seed_snapshot(&mut self, snapshot: &ConfigSnapshot) {
        for (code, pass) in &snapshot.passes {
            self.seed_pass(
                code,
                PassEntry {
                    kind: pass.kind,
                    day_flags: pass.days.clone(),
                    count: pass.count.unwrap_or(0),
                },
            );
        }
    }

    pub fn pass_entry(&self, code: &str) -> Option<&PassEntry> {
        self.passes.get(code)
    }

    pub fn pass_codes(&self) -> impl Iterator<Item = &str> {
        self.passes.keys().map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Create and append a locally-originated event.
    ///
    /// Must be called only after admission accepts; returns `None` when the
    /// code has no projection entry (admission would have denied it).
    pub fn apply_local(
        &mut self,
        code: &str,
        day: &str,
        now_ms: i64,
        device_id: &str,
        ids: &dyn IdSource,
    ) -> Option<ScanRecord> {
        if !self.passes.contains_key(code) {
            return None;
        }
        let event = ScanRecord {
            scan_id: ids.next_id(),
            qr_code: code.to_owned(),
            ts_ms: now_ms,
            device_id: device_id.to_owned(),
            day: day.to_owned(),
        };
        let learned = self.merge_deltas(vec![event.clone()]);
        debug_assert_eq!(learned.len(), 1);
        Some(event)
    }

    /// Merge incoming events; returns only the ones actually newly learned.
    ///
    /// Events whose `scan_id` is already present are dropped.  The cached
    /// per-code ordering is refreshed and projection counters bumped for
    /// every new event.
    pub fn merge_deltas(&mut self, events: Vec<ScanRecord>) -> Vec<ScanRecord> {
        let mut new_events = Vec::new();
        let mut touched: HashSet<String> = HashSet::new();

        for event in events {
            if event.qr_code.is_empty() || event.device_id.is_empty() {
                continue;
            }
            let entry = self.log.entry(event.qr_code.clone()).or_default();
            if !entry.ids.insert(event.scan_id) {
                continue;
            }
            entry.scans.push(event.clone());
            touched.insert(event.qr_code.clone());
            if let Some(pass) = self.passes.get_mut(&event.qr_code) {
                pass.count += 1;
            }
            new_events.push(event);
        }

        for code in touched {
            if let Some(entry) = self.log.get_mut(&code) {
                entry
                    .scans
                    .sort_by(|a, b| (a.ts_ms, &a.device_id).cmp(&(b.ts_ms, &b.device_id)));
            }
        }

        new_events
    }

    /// Merge a peer's full state.
    ///
    /// Codes we do not yet project are admitted with their declared type;
    /// codes we already project keep the local declaration.  Scan merging
    /// flattens into a single delta list.
    pub fn merge_full_state(&mut self, snapshot: FullState) -> Vec<ScanRecord> {
        let mut deltas = Vec::new();
        for (code, state) in snapshot {
            self.seed_pass(
                &code,
                PassEntry {
                    kind: state.pass_type,
                    day_flags: None,
                    count: 0,
                },
            );
            deltas.extend(state.scans);
        }
        self.merge_deltas(deltas)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn scans_for(&self, code: &str) -> &[ScanRecord] {
        self.log.get(code).map(|e| e.scans.as_slice()).unwrap_or(&[])
    }

    pub fn scans_for_day(&self, code: &str, day: &str) -> Vec<ScanRecord> {
        self.scans_for(code)
            .iter()
            .filter(|s| s.day == day)
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.log.values().map(|e| e.scans.len()).sum()
    }

    /// The wire/full-state view: every code we project or hold scans for.
    ///
    /// Codes present only in the log (no projection entry — possible under
    /// config drift across the fleet) are declared `one-use`: the
    /// conservative reading until a snapshot-bearing peer corrects it.
    pub fn to_full_state(&self) -> FullState {
        let mut out: FullState = BTreeMap::new();
        for (code, pass) in &self.passes {
            out.insert(
                code.clone(),
                CodeState {
                    pass_type: pass.kind,
                    scans: self.scans_for(code).to_vec(),
                },
            );
        }
        for (code, entry) in &self.log {
            out.entry(code.clone()).or_insert_with(|| CodeState {
                pass_type: PassKind::OneUse,
                scans: entry.scans.clone(),
            });
        }
        out
    }

    /// The projection as a config snapshot (for `query_config`).
    pub fn to_config_snapshot(&self) -> ConfigSnapshot {
        let passes = self
            .passes
            .iter()
            .map(|(code, pass)| {
                (
                    code.clone(),
                    PassConfig {
                        kind: pass.kind,
                        days: pass.day_flags.clone(),
                        count: Some(pass.count),
                    },
                )
            })
            .collect();
        ConfigSnapshot { passes }
    }

    /// Deterministic fingerprint of the entire event set.
    ///
    /// `"empty"` with no events; otherwise
    /// `"{N}-{min_id[0..8]}-{max_id[0..8]}"` over the ascending-sorted
    /// scan-id strings.  Every peer must agree on this algorithm or hashes
    /// never match and full-state sync carries the load.
    pub fn state_hash(&self) -> String {
        let mut min_id: Option<String> = None;
        let mut max_id: Option<String> = None;
        let mut count: usize = 0;

        for entry in self.log.values() {
            for scan in &entry.scans {
                count += 1;
                let id = scan.scan_id.to_string();
                match &min_id {
                    Some(current) if *current <= id => {}
                    _ => min_id = Some(id.clone()),
                }
                match &max_id {
                    Some(current) if *current >= id => {}
                    _ => max_id = Some(id),
                }
            }
        }

        match (min_id, max_id) {
            (Some(min), Some(max)) => format!("{}-{}-{}", count, &min[..8], &max[..8]),
            _ => "empty".to_owned(),
        }
    }
}
