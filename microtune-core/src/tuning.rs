//! # Musical Tuning Module
//!
//! Maps frequencies onto arbitrary tuning systems. A [`TuningTable`] lists
//! scale degrees and their position in cents above the tonic; a
//! [`PitchStandard`] pins one degree to a reference frequency. Together they
//! form a [`TuningSnapshot`], which answers "which degree is this, and how
//! many cents off?".
//!
//! ## Features
//! - Any number of degrees, values 0-12000 cents (tables may span octaves)
//! - Octave-equivalent nearest-degree search with deterministic tie-breaking
//! - 12-tone equal temperament with A4 = 440 Hz out of the box
//! - [`TuningHandle`] for swapping tables and standards while audio is running

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{TunerError, TunerResult};

/// Largest cents value a table entry may hold (ten octaves).
pub const MAX_TABLE_CENTS: f32 = 12000.0;

const OCTAVE_CENTS: f32 = 1200.0;

/// Note names for the twelve degrees of the default chromatic scale.
pub static DEFAULT_NOTE_NAMES: Lazy<BTreeMap<i32, String>> = Lazy::new(|| {
    const NAMES: [&str; 12] = [
        "C", "C#/Db", "D", "D#/Eb", "E", "F", "F#/Gb", "G", "G#/Ab", "A", "A#/Bb", "B",
    ];
    NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| (i as i32, name.to_string()))
        .collect()
});

/// 12-tone equal temperament with C as degree 0, computed once.
static EDO12: Lazy<TuningTable> = Lazy::new(|| {
    let entries = (0..12).map(|i| (i, i as f32 * 100.0));
    TuningTable::new("EDO12", entries)
        .expect("the 12-EDO table is well-formed")
        .with_note_names(DEFAULT_NOTE_NAMES.clone())
});

/// Degree of A in the default table.
pub const DEFAULT_STANDARD_DEGREE: i32 = 9;

/// Default reference frequency for [`DEFAULT_STANDARD_DEGREE`].
pub const DEFAULT_STANDARD_HZ: f32 = 440.0;

/// One degree of a tuning table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleNote {
    pub degree: i32,
    pub cents: f32,
    pub name: Option<String>,
}

/// A validated tuning system: scale degree -> cents above the tonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTuningTable", into = "RawTuningTable")]
pub struct TuningTable {
    name: String,
    /// Sorted by degree, degrees unique.
    notes: Vec<ScaleNote>,
}

/// Serialized shape of a tuning table: `{ "name", "notes", "note_names" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTuningTable {
    #[serde(default)]
    name: String,
    notes: BTreeMap<i32, f32>,
    #[serde(default)]
    note_names: BTreeMap<i32, String>,
}

impl TryFrom<RawTuningTable> for TuningTable {
    type Error = TunerError;

    fn try_from(raw: RawTuningTable) -> TunerResult<Self> {
        Ok(TuningTable::new(raw.name, raw.notes)?.with_note_names(raw.note_names))
    }
}

impl From<TuningTable> for RawTuningTable {
    fn from(table: TuningTable) -> Self {
        let note_names = table
            .notes
            .iter()
            .filter_map(|n| n.name.clone().map(|name| (n.degree, name)))
            .collect();
        let notes = table.notes.iter().map(|n| (n.degree, n.cents)).collect();
        RawTuningTable {
            name: table.name,
            notes,
            note_names,
        }
    }
}

impl TuningTable {
    /// Builds a table from `(degree, cents)` pairs.
    ///
    /// # Errors
    /// * [`TunerError::EmptyTuningTable`] - No entries
    /// * [`TunerError::DuplicateDegree`] - A degree appears twice
    /// * [`TunerError::CentsOutOfRange`] - Cents outside 0..=12000 or not finite
    pub fn new(
        name: impl Into<String>,
        entries: impl IntoIterator<Item = (i32, f32)>,
    ) -> TunerResult<Self> {
        let mut seen = HashSet::new();
        let mut notes = Vec::new();
        for (degree, cents) in entries {
            if !seen.insert(degree) {
                return Err(TunerError::DuplicateDegree(degree));
            }
            if !(cents.is_finite() && (0.0..=MAX_TABLE_CENTS).contains(&cents)) {
                return Err(TunerError::CentsOutOfRange { degree, cents });
            }
            notes.push(ScaleNote {
                degree,
                cents,
                name: None,
            });
        }
        if notes.is_empty() {
            return Err(TunerError::EmptyTuningTable);
        }
        notes.sort_by_key(|n| n.degree);
        Ok(Self {
            name: name.into(),
            notes,
        })
    }

    /// Equal division of the octave into `divisions` steps.
    pub fn equal_temperament(divisions: u32) -> TunerResult<Self> {
        let step = OCTAVE_CENTS / divisions.max(1) as f32;
        Self::new(
            format!("EDO{divisions}"),
            (0..divisions).map(|i| (i as i32, i as f32 * step)),
        )
    }

    /// The standard chromatic scale with note names.
    pub fn edo12() -> Self {
        EDO12.clone()
    }

    /// Attaches note names; names for unknown degrees are ignored.
    pub fn with_note_names(mut self, names: impl IntoIterator<Item = (i32, String)>) -> Self {
        for (degree, name) in names {
            if let Some(note) = self.note_mut(degree) {
                note.name = Some(name);
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn notes(&self) -> &[ScaleNote] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Always false for a constructed table.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn note(&self, degree: i32) -> Option<&ScaleNote> {
        self.notes
            .binary_search_by_key(&degree, |n| n.degree)
            .ok()
            .map(|i| &self.notes[i])
    }

    fn note_mut(&mut self, degree: i32) -> Option<&mut ScaleNote> {
        self.notes
            .binary_search_by_key(&degree, |n| n.degree)
            .ok()
            .map(move |i| &mut self.notes[i])
    }

    pub fn cents(&self, degree: i32) -> Option<f32> {
        self.note(degree).map(|n| n.cents)
    }

    /// Finds a degree by note name. Combined names like "C#/Db" match either part.
    pub fn degree_by_name(&self, name: &str) -> Option<i32> {
        self.notes.iter().find_map(|n| {
            let note_name = n.name.as_deref()?;
            (note_name == name || note_name.split('/').any(|part| part == name)).then_some(n.degree)
        })
    }
}

/// The reference frequency assigned to one degree of the table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPitchStandard")]
pub struct PitchStandard {
    frequency_hz: f32,
    degree: i32,
}

#[derive(Deserialize)]
struct RawPitchStandard {
    frequency_hz: f32,
    #[serde(default)]
    degree: i32,
}

impl TryFrom<RawPitchStandard> for PitchStandard {
    type Error = TunerError;

    fn try_from(raw: RawPitchStandard) -> TunerResult<Self> {
        PitchStandard::new(raw.frequency_hz, raw.degree)
    }
}

impl PitchStandard {
    /// # Errors
    /// * [`TunerError::DegenerateStandard`] - Frequency not positive and finite
    pub fn new(frequency_hz: f32, degree: i32) -> TunerResult<Self> {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(TunerError::DegenerateStandard(frequency_hz));
        }
        Ok(Self { frequency_hz, degree })
    }

    pub fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    pub fn degree(&self) -> i32 {
        self.degree
    }
}

/// The nearest degree to a frequency and how far off it is.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningResult {
    pub degree: i32,
    pub name: Option<String>,
    /// Positive = sharp, negative = flat.
    pub cents_offset: f32,
    /// Exact frequency of the nearest degree in the played octave.
    pub target_hz: f32,
    /// Octave relative to the standard's octave.
    pub octave: i32,
}

/// Calculates the deviation from a target frequency in cents.
///
/// # Returns
/// * Cent deviation (positive = sharp, negative = flat)
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Reduces a cents difference to the range (-600, 600].
fn wrap_to_half_octave(cents: f32) -> f32 {
    let wrapped = cents.rem_euclid(OCTAVE_CENTS);
    if wrapped > OCTAVE_CENTS / 2.0 {
        wrapped - OCTAVE_CENTS
    } else {
        wrapped
    }
}

/// An immutable (table, standard) pair, read once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningSnapshot {
    table: Arc<TuningTable>,
    standard: PitchStandard,
}

impl TuningSnapshot {
    /// # Errors
    /// * [`TunerError::UnknownDegree`] - The standard's degree is not in the table
    pub fn new(table: Arc<TuningTable>, standard: PitchStandard) -> TunerResult<Self> {
        if table.note(standard.degree).is_none() {
            return Err(TunerError::UnknownDegree(standard.degree));
        }
        Ok(Self { table, standard })
    }

    pub fn table(&self) -> &Arc<TuningTable> {
        &self.table
    }

    pub fn standard(&self) -> PitchStandard {
        self.standard
    }

    /// Cents of `frequency` above the table's degree 0 position.
    fn cents_from_tonic(&self, frequency: f32) -> f32 {
        let standard_cents = self.table.cents(self.standard.degree).unwrap_or(0.0);
        calculate_cents_deviation(frequency, self.standard.frequency_hz) + standard_cents
    }

    /// Finds the nearest degree to `frequency`.
    ///
    /// Degrees are compared modulo the octave. Equidistant degrees resolve to
    /// the lower one. Returns `None` for non-positive or non-finite input.
    pub fn map(&self, frequency: f32) -> Option<TuningResult> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return None;
        }
        let position = self.cents_from_tonic(frequency);
        let position_in_octave = position.rem_euclid(OCTAVE_CENTS);

        let mut best: Option<(&ScaleNote, f32)> = None;
        for note in &self.table.notes {
            let offset = wrap_to_half_octave(position_in_octave - note.cents.rem_euclid(OCTAVE_CENTS));
            match best {
                Some((_, best_offset)) if offset.abs() >= best_offset.abs() => {}
                _ => best = Some((note, offset)),
            }
        }
        let (note, cents_offset) = best?;

        let target_position = position - cents_offset;
        let octave = ((target_position - note.cents) / OCTAVE_CENTS).round() as i32;

        Some(TuningResult {
            degree: note.degree,
            name: note.name.clone(),
            cents_offset,
            target_hz: frequency * 2f32.powf(-cents_offset / OCTAVE_CENTS),
            octave,
        })
    }

    /// Frequency of `degree` in the standard's octave.
    pub fn degree_frequency(&self, degree: i32) -> Option<f32> {
        let cents = self.table.cents(degree)?;
        let standard_cents = self.table.cents(self.standard.degree)?;
        Some(self.standard.frequency_hz * 2f32.powf((cents - standard_cents) / OCTAVE_CENTS))
    }
}

impl Default for TuningSnapshot {
    fn default() -> Self {
        Self {
            table: Arc::new(TuningTable::edo12()),
            standard: PitchStandard {
                frequency_hz: DEFAULT_STANDARD_HZ,
                degree: DEFAULT_STANDARD_DEGREE,
            },
        }
    }
}

/// Shared, swappable tuning state.
///
/// Writers replace the whole snapshot; readers take an `Arc` to the current
/// one. The lock is only held to clone or replace that `Arc`, so the
/// processing thread never sees a half-updated table/standard pair.
#[derive(Debug, Clone, Default)]
pub struct TuningHandle {
    current: Arc<RwLock<Arc<TuningSnapshot>>>,
}

impl TuningHandle {
    pub fn new(snapshot: TuningSnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<TuningSnapshot> {
        self.current.read().clone()
    }

    /// Replaces table and standard together.
    pub fn set_tuning(&self, table: TuningTable, standard: PitchStandard) -> TunerResult<()> {
        let snapshot = TuningSnapshot::new(Arc::new(table), standard)?;
        *self.current.write() = Arc::new(snapshot);
        Ok(())
    }

    /// Changes the reference frequency, keeping its degree.
    ///
    /// On error the previous standard stays in effect.
    pub fn set_standard_hz(&self, frequency_hz: f32) -> TunerResult<()> {
        let mut current = self.current.write();
        let standard = PitchStandard::new(frequency_hz, current.standard.degree)?;
        log::info!(
            "[TUNING] Pitch standard {:.2} Hz -> {:.2} Hz",
            current.standard.frequency_hz,
            frequency_hz
        );
        *current = Arc::new(TuningSnapshot::new(Arc::clone(&current.table), standard)?);
        Ok(())
    }

    /// Changes the reference frequency and the degree it applies to.
    pub fn set_standard(&self, standard: PitchStandard) -> TunerResult<()> {
        let mut current = self.current.write();
        *current = Arc::new(TuningSnapshot::new(Arc::clone(&current.table), standard)?);
        Ok(())
    }

    /// Swaps the tuning table, keeping the standard.
    ///
    /// Fails if the standard's degree does not exist in the new table.
    pub fn set_table(&self, table: TuningTable) -> TunerResult<()> {
        let mut current = self.current.write();
        log::info!("[TUNING] Switching table '{}' -> '{}'", current.table.name, table.name);
        *current = Arc::new(TuningSnapshot::new(Arc::new(table), current.standard)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn single_degree(reference: f32) -> TuningSnapshot {
        let table = TuningTable::new("unison", [(0, 0.0)]).unwrap();
        TuningSnapshot::new(Arc::new(table), PitchStandard::new(reference, 0).unwrap()).unwrap()
    }

    #[test]
    fn test_reference_maps_to_degree_zero() {
        let snapshot = single_degree(261.63);
        let result = snapshot.map(261.63).unwrap();
        assert_eq!(result.degree, 0);
        assert_abs_diff_eq!(result.cents_offset, 0.0, epsilon = 1e-3);
        assert_eq!(result.octave, 0);
    }

    #[test]
    fn test_default_table_finds_a4() {
        let snapshot = TuningSnapshot::default();
        let result = snapshot.map(442.0).unwrap();
        assert_eq!(result.degree, 9);
        assert_eq!(result.name.as_deref(), Some("A"));
        assert_abs_diff_eq!(result.cents_offset, 7.85, epsilon = 0.01);
        assert_abs_diff_eq!(result.target_hz, 440.0, epsilon = 1e-2);
    }

    #[test]
    fn test_octave_equivalence() {
        let snapshot = TuningSnapshot::default();
        let low = snapshot.map(110.0).unwrap();
        let high = snapshot.map(1760.0).unwrap();
        assert_eq!(low.degree, 9);
        assert_eq!(high.degree, 9);
        assert_eq!(low.octave, -2);
        assert_eq!(high.octave, 2);
        assert_abs_diff_eq!(low.target_hz, 110.0, epsilon = 1e-2);
    }

    #[test]
    fn test_wraps_across_octave_boundary() {
        // Just below C: nearest is degree 0 of the next octave, not B.
        let snapshot = TuningSnapshot::default();
        let c5 = snapshot.degree_frequency(0).unwrap() * 2.0;
        let result = snapshot.map(c5 * 2f32.powf(-10.0 / 1200.0)).unwrap();
        assert_eq!(result.degree, 0);
        assert_abs_diff_eq!(result.cents_offset, -10.0, epsilon = 1e-2);
    }

    #[test]
    fn test_multi_octave_table() {
        // Degree 3 sits an octave above degree 0 plus 700 cents.
        let table = TuningTable::new("wide", [(0, 0.0), (3, 1900.0)]).unwrap();
        let snapshot =
            TuningSnapshot::new(Arc::new(table), PitchStandard::new(100.0, 0).unwrap()).unwrap();
        let fifth = 100.0 * 2f32.powf(705.0 / 1200.0);
        let result = snapshot.map(fifth).unwrap();
        assert_eq!(result.degree, 3);
        assert_abs_diff_eq!(result.cents_offset, 5.0, epsilon = 1e-2);
    }

    #[test]
    fn test_ties_resolve_to_lower_degree() {
        // Degrees 0 and 5 are the same pitch class an octave apart.
        let table = TuningTable::new("doubled", [(5, 1200.0), (0, 0.0), (2, 700.0)]).unwrap();
        let snapshot =
            TuningSnapshot::new(Arc::new(table), PitchStandard::new(100.0, 0).unwrap()).unwrap();
        let result = snapshot.map(100.0).unwrap();
        assert_eq!(result.degree, 0);
        assert_eq!(result.cents_offset, 0.0);
    }

    #[test]
    fn test_invalid_tables() {
        assert_eq!(
            TuningTable::new("empty", Vec::<(i32, f32)>::new()),
            Err(TunerError::EmptyTuningTable)
        );
        assert_eq!(
            TuningTable::new("dup", [(0, 0.0), (0, 100.0)]),
            Err(TunerError::DuplicateDegree(0))
        );
        assert!(matches!(
            TuningTable::new("high", [(0, 0.0), (1, 12000.5)]),
            Err(TunerError::CentsOutOfRange { degree: 1, .. })
        ));
        assert!(matches!(
            TuningTable::new("neg", [(0, -1.0)]),
            Err(TunerError::CentsOutOfRange { degree: 0, .. })
        ));
        assert!(matches!(
            TuningTable::new("nan", [(0, f32::NAN)]),
            Err(TunerError::CentsOutOfRange { .. })
        ));
    }

    #[test]
    fn test_degenerate_standard_keeps_previous() {
        let handle = TuningHandle::default();
        assert_eq!(handle.set_standard_hz(0.0), Err(TunerError::DegenerateStandard(0.0)));
        assert!(handle.set_standard_hz(-440.0).is_err());
        assert!(handle.set_standard_hz(f32::INFINITY).is_err());
        assert_eq!(handle.snapshot().standard().frequency_hz(), 440.0);
    }

    #[test]
    fn test_standard_change_applies_to_next_call() {
        let handle = TuningHandle::default();
        let before = handle.snapshot().map(430.0).unwrap();
        assert!(before.cents_offset < -39.0);

        handle.set_standard_hz(430.0).unwrap();
        let after = handle.snapshot().map(430.0).unwrap();
        assert_eq!(after.degree, 9);
        assert_abs_diff_eq!(after.cents_offset, 0.0, epsilon = 1e-3);
        // Snapshots taken earlier are unaffected.
        assert_abs_diff_eq!(before.target_hz, 440.0, epsilon = 1e-2);
    }

    #[test]
    fn test_table_swap_requires_standard_degree() {
        let handle = TuningHandle::default();
        let pentatonic =
            TuningTable::new("penta", [(0, 0.0), (1, 200.0), (2, 400.0), (3, 700.0), (4, 900.0)])
                .unwrap();
        assert_eq!(handle.set_table(pentatonic.clone()), Err(TunerError::UnknownDegree(9)));
        handle
            .set_tuning(pentatonic, PitchStandard::new(440.0, 4).unwrap())
            .unwrap();
        assert_eq!(handle.snapshot().map(440.0).unwrap().degree, 4);
    }

    #[test]
    fn test_equal_temperament_and_names() {
        let table = TuningTable::equal_temperament(24).unwrap();
        assert_eq!(table.len(), 24);
        assert_abs_diff_eq!(table.cents(1).unwrap(), 50.0);
        assert!(TuningTable::equal_temperament(0).is_err());

        let edo12 = TuningTable::edo12();
        assert_eq!(edo12.degree_by_name("Db"), Some(1));
        assert_eq!(edo12.degree_by_name("A"), Some(9));
        assert_eq!(edo12.degree_by_name("H"), None);
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "name": "Pythagorean fragment",
            "notes": { "0": 0.0, "1": 203.91, "2": 407.82 },
            "note_names": { "0": "C", "1": "D", "2": "E" }
        }"#;
        let table: TuningTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.name(), "Pythagorean fragment");
        assert_eq!(table.note(1).unwrap().name.as_deref(), Some("D"));

        let bad = r#"{ "notes": {} }"#;
        assert!(serde_json::from_str::<TuningTable>(bad).is_err());

        let encoded = serde_json::to_string(&table).unwrap();
        let decoded: TuningTable = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_standard_json_is_validated() {
        let standard: PitchStandard =
            serde_json::from_str(r#"{ "frequency_hz": 415.0, "degree": 9 }"#).unwrap();
        assert_eq!(standard, PitchStandard::new(415.0, 9).unwrap());

        let tonic: PitchStandard = serde_json::from_str(r#"{ "frequency_hz": 261.6 }"#).unwrap();
        assert_eq!(tonic.degree(), 0);

        assert!(serde_json::from_str::<PitchStandard>(r#"{ "frequency_hz": 0.0 }"#).is_err());
        assert!(serde_json::from_str::<PitchStandard>(r#"{ "frequency_hz": -440.0 }"#).is_err());
    }
}
