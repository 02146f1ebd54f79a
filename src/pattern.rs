use include_dir::{include_dir, Dir};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

static PATTERN_DIR: Dir = include_dir!("src/patterns");

/// One quarter of a breathing cycle, in cyclic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[strum(serialize = "inhale")]
    Inhale,
    #[strum(serialize = "holdIn")]
    HoldIn,
    #[strum(serialize = "exhale")]
    Exhale,
    #[strum(serialize = "holdOut")]
    HoldOut,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Inhale, Phase::HoldIn, Phase::Exhale, Phase::HoldOut];

    fn index(self) -> usize {
        match self {
            Phase::Inhale => 0,
            Phase::HoldIn => 1,
            Phase::Exhale => 2,
            Phase::HoldOut => 3,
        }
    }

    /// Text shown inside the breathing indicator
    pub fn label(self) -> &'static str {
        match self {
            Phase::Inhale => "Breathe In",
            Phase::HoldIn | Phase::HoldOut => "Hold",
            Phase::Exhale => "Breathe Out",
        }
    }

    /// Short cue used in pattern summaries
    pub fn cue(self) -> &'static str {
        match self {
            Phase::Inhale => "inhale",
            Phase::HoldIn | Phase::HoldOut => "hold",
            Phase::Exhale => "exhale",
        }
    }

    /// Chime pitch in Hz; every phase gets its own note so it can be told apart by ear.
    pub fn frequency(self) -> f64 {
        match self {
            Phase::Inhale => 523.25,
            Phase::HoldIn => 659.25,
            Phase::Exhale => 392.0,
            Phase::HoldOut => 329.63,
        }
    }
}

pub const MIN_SCALE: f64 = 0.5;
pub const MAX_SCALE: f64 = 1.0;

/// Size of the breathing indicator for a phase at a given progress, in `[0.5, 1.0]`.
pub fn scale(phase: Phase, progress: f64) -> f64 {
    let progress = progress.clamp(0.0, 1.0);
    let range = MAX_SCALE - MIN_SCALE;

    match phase {
        Phase::Inhale => MIN_SCALE + range * progress,
        Phase::HoldIn => MAX_SCALE,
        Phase::Exhale => MAX_SCALE - range * progress,
        Phase::HoldOut => MIN_SCALE,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("pattern {0} has no phase with a nonzero duration")]
    NoActivePhase(PatternId),

    #[error("invalid duration for {phase}: {secs}")]
    InvalidDuration { phase: Phase, secs: f64 },

    #[error("pattern id must not be empty")]
    EmptyId,

    #[error("malformed pattern catalog: {0}")]
    Catalog(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PatternId {
    #[default]
    Box,
    FourSevenEight,
    Coherent,
    Custom(String),
}

impl PatternId {
    pub fn as_str(&self) -> &str {
        match self {
            PatternId::Box => "box",
            PatternId::FourSevenEight => "4-7-8",
            PatternId::Coherent => "coherent",
            PatternId::Custom(id) => id,
        }
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternId {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(PatternError::EmptyId),
            "box" => Ok(PatternId::Box),
            "4-7-8" => Ok(PatternId::FourSevenEight),
            "coherent" => Ok(PatternId::Coherent),
            other => Ok(PatternId::Custom(other.to_string())),
        }
    }
}

impl TryFrom<String> for PatternId {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PatternId> for String {
    fn from(id: PatternId) -> Self {
        id.as_str().to_string()
    }
}

/// Seconds per phase as they appear in catalogs; a missing phase is skipped.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PhaseSeconds {
    inhale: f64,
    hold_in: f64,
    exhale: f64,
    hold_out: f64,
}

/// How long each phase lasts; a zero duration removes the phase from the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "PhaseSeconds", into = "PhaseSeconds")]
pub struct PhaseDurations {
    pub inhale: Duration,
    pub hold_in: Duration,
    pub exhale: Duration,
    pub hold_out: Duration,
}

impl TryFrom<PhaseSeconds> for PhaseDurations {
    type Error = PatternError;

    fn try_from(raw: PhaseSeconds) -> Result<Self, Self::Error> {
        let convert = |phase: Phase, secs: f64| {
            Duration::try_from_secs_f64(secs).map_err(|_| PatternError::InvalidDuration { phase, secs })
        };

        Ok(Self {
            inhale: convert(Phase::Inhale, raw.inhale)?,
            hold_in: convert(Phase::HoldIn, raw.hold_in)?,
            exhale: convert(Phase::Exhale, raw.exhale)?,
            hold_out: convert(Phase::HoldOut, raw.hold_out)?,
        })
    }
}

impl From<PhaseDurations> for PhaseSeconds {
    fn from(d: PhaseDurations) -> Self {
        Self {
            inhale: d.inhale.as_secs_f64(),
            hold_in: d.hold_in.as_secs_f64(),
            exhale: d.exhale.as_secs_f64(),
            hold_out: d.hold_out.as_secs_f64(),
        }
    }
}

impl PhaseDurations {
    pub fn uniform(each: Duration) -> Self {
        Self {
            inhale: each,
            hold_in: each,
            exhale: each,
            hold_out: each,
        }
    }

    pub fn get(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Inhale => self.inhale,
            Phase::HoldIn => self.hold_in,
            Phase::Exhale => self.exhale,
            Phase::HoldOut => self.hold_out,
        }
    }

    pub fn is_active(&self, phase: Phase) -> bool {
        !self.get(phase).is_zero()
    }

    /// Phases with a nonzero duration, in cyclic order
    pub fn active_sequence(&self) -> Vec<Phase> {
        Phase::ALL
            .into_iter()
            .filter(|p| self.is_active(*p))
            .collect()
    }

    pub fn first_active(&self) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| self.is_active(*p))
    }

    /// The phase that follows `phase` in the active sequence, wrapping around.
    /// A pattern with a single active phase follows itself.
    pub fn successor(&self, phase: Phase) -> Phase {
        (1..=Phase::ALL.len())
            .map(|offset| Phase::ALL[(phase.index() + offset) % Phase::ALL.len()])
            .find(|p| self.is_active(*p))
            .unwrap_or(phase)
    }

    pub fn cycle_length(&self) -> Duration {
        Phase::ALL.into_iter().map(|p| self.get(p)).sum()
    }
}

#[derive(Debug, Deserialize)]
struct PatternRecord {
    id: PatternId,
    name: String,
    #[serde(default)]
    tagline: String,
    phases: PhaseDurations,
}

impl TryFrom<PatternRecord> for BreathPattern {
    type Error = PatternError;

    fn try_from(r: PatternRecord) -> Result<Self, Self::Error> {
        BreathPattern::new(r.id, r.name, r.tagline, r.phases)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PatternRecord")]
pub struct BreathPattern {
    pub id: PatternId,
    pub name: String,
    pub tagline: String,
    pub phases: PhaseDurations,
}

impl BreathPattern {
    pub fn new(
        id: PatternId,
        name: impl Into<String>,
        tagline: impl Into<String>,
        phases: PhaseDurations,
    ) -> Result<Self, PatternError> {
        if phases.first_active().is_none() {
            return Err(PatternError::NoActivePhase(id));
        }

        Ok(Self {
            id,
            name: name.into(),
            tagline: tagline.into(),
            phases,
        })
    }

    /// Durations used for a session. Box breathing takes the user's uniform duration.
    pub fn durations_for(&self, box_duration: Duration) -> PhaseDurations {
        match self.id {
            PatternId::Box if !box_duration.is_zero() => PhaseDurations::uniform(box_duration),
            _ => self.phases,
        }
    }

    /// e.g. `Box breathing: 4s inhale → 4s hold → 4s exhale → 4s hold`
    pub fn summary(&self, box_duration: Duration) -> String {
        let phases = self.durations_for(box_duration);
        let steps = phases
            .active_sequence()
            .into_iter()
            .map(|p| format!("{} {}", format_secs(phases.get(p)), p.cue()))
            .join(" → ");

        format!("{} breathing: {}", self.name, steps)
    }
}

fn format_secs(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}s", secs as u64)
    } else {
        format!("{:.1}s", secs)
    }
}

/// Ordered set of selectable patterns. Built-ins come first; catalog patterns
/// with an unknown id are appended, known ids are replaced in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternCatalog {
    patterns: Vec<BreathPattern>,
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PatternCatalog {
    pub fn builtin() -> Self {
        let file = PATTERN_DIR
            .get_file("builtin.json")
            .expect("builtin pattern catalog not embedded");
        let json = file
            .contents_utf8()
            .expect("builtin pattern catalog is not utf-8");
        let patterns = Self::parse(json).expect("builtin pattern catalog is malformed");

        Self { patterns }
    }

    pub fn parse(json: &str) -> Result<Vec<BreathPattern>, PatternError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn merge(&mut self, extra: Vec<BreathPattern>) {
        for pattern in extra {
            match self.patterns.iter_mut().find(|p| p.id == pattern.id) {
                Some(existing) => *existing = pattern,
                None => self.patterns.push(pattern),
            }
        }
    }

    pub fn get(&self, id: &PatternId) -> Option<&BreathPattern> {
        self.patterns.iter().find(|p| &p.id == id)
    }

    /// Looks up `id`, falling back to box breathing.
    pub fn resolve(&self, id: &PatternId) -> &BreathPattern {
        self.get(id)
            .or_else(|| self.get(&PatternId::Box))
            .unwrap_or(&self.patterns[0])
    }

    pub fn next_after(&self, id: &PatternId) -> &BreathPattern {
        let idx = self.position(id);
        &self.patterns[(idx + 1) % self.patterns.len()]
    }

    pub fn previous_before(&self, id: &PatternId) -> &BreathPattern {
        let idx = self.position(id);
        &self.patterns[(idx + self.patterns.len() - 1) % self.patterns.len()]
    }

    fn position(&self, id: &PatternId) -> usize {
        self.patterns.iter().position(|p| &p.id == id).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreathPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_builtin_catalog_has_three_patterns() {
        let catalog = PatternCatalog::builtin();
        let ids: Vec<String> = catalog.iter().map(|p| p.id.to_string()).collect();

        assert_eq!(ids, vec!["box", "4-7-8", "coherent"]);
    }

    #[test]
    fn test_four_seven_eight_skips_hold_out() {
        let catalog = PatternCatalog::builtin();
        let p = catalog.get(&PatternId::FourSevenEight).unwrap();

        assert_eq!(
            p.phases.active_sequence(),
            vec![Phase::Inhale, Phase::HoldIn, Phase::Exhale]
        );
        assert_eq!(p.phases.successor(Phase::Exhale), Phase::Inhale);
        assert_eq!(p.phases.hold_in, secs(7.0));
        assert_eq!(p.phases.exhale, secs(8.0));
    }

    #[test]
    fn test_coherent_alternates_in_and_out() {
        let catalog = PatternCatalog::builtin();
        let p = catalog.get(&PatternId::Coherent).unwrap();

        assert_eq!(p.phases.active_sequence(), vec![Phase::Inhale, Phase::Exhale]);
        assert_eq!(p.phases.successor(Phase::Inhale), Phase::Exhale);
        assert_eq!(p.phases.successor(Phase::Exhale), Phase::Inhale);
        assert_eq!(p.phases.cycle_length(), secs(11.0));
    }

    #[test]
    fn test_successor_with_single_active_phase() {
        let phases = PhaseDurations {
            exhale: secs(3.0),
            ..Default::default()
        };

        assert_eq!(phases.first_active(), Some(Phase::Exhale));
        assert_eq!(phases.successor(Phase::Exhale), Phase::Exhale);
    }

    #[test]
    fn test_pattern_without_active_phase_is_rejected() {
        let result = BreathPattern::new(
            PatternId::Custom("empty".into()),
            "Empty",
            "",
            PhaseDurations::default(),
        );

        assert!(matches!(result, Err(PatternError::NoActivePhase(_))));
    }

    #[test]
    fn test_box_uses_runtime_duration() {
        let catalog = PatternCatalog::builtin();
        let p = catalog.get(&PatternId::Box).unwrap();

        assert_eq!(p.durations_for(secs(6.0)), PhaseDurations::uniform(secs(6.0)));
        assert_eq!(
            p.summary(secs(6.0)),
            "Box breathing: 6s inhale → 6s hold → 6s exhale → 6s hold"
        );
    }

    #[test]
    fn test_other_patterns_ignore_box_duration() {
        let catalog = PatternCatalog::builtin();
        let p = catalog.get(&PatternId::Coherent).unwrap();

        assert_eq!(p.durations_for(secs(6.0)), p.phases);
        assert_eq!(
            p.summary(secs(6.0)),
            "Coherent breathing: 5.5s inhale → 5.5s exhale"
        );
    }

    #[test]
    fn test_scale_ramps_and_holds() {
        assert_eq!(scale(Phase::Inhale, 0.0), 0.5);
        assert_eq!(scale(Phase::Inhale, 0.5), 0.75);
        assert_eq!(scale(Phase::HoldIn, 0.3), 1.0);
        assert_eq!(scale(Phase::Exhale, 0.5), 0.75);
        assert_eq!(scale(Phase::HoldOut, 0.9), 0.5);
        assert_eq!(scale(Phase::Inhale, 2.0), 1.0);
    }

    #[test]
    fn test_phase_frequencies_are_distinct() {
        let freqs: Vec<f64> = Phase::ALL.iter().map(|p| p.frequency()).collect();
        assert_eq!(freqs, vec![523.25, 659.25, 392.0, 329.63]);
    }

    #[test]
    fn test_pattern_id_parsing() {
        assert_eq!("box".parse::<PatternId>().unwrap(), PatternId::Box);
        assert_eq!("4-7-8".parse::<PatternId>().unwrap(), PatternId::FourSevenEight);
        assert_eq!(
            "triangle".parse::<PatternId>().unwrap(),
            PatternId::Custom("triangle".into())
        );
        assert!(matches!("  ".parse::<PatternId>(), Err(PatternError::EmptyId)));
    }

    #[test]
    fn test_catalog_merge_appends_and_replaces() {
        let mut catalog = PatternCatalog::builtin();
        let extra = PatternCatalog::parse(
            r#"[
                {"id": "triangle", "name": "Triangle", "phases": {"inhale": 3, "holdIn": 3, "exhale": 3}},
                {"id": "coherent", "name": "Coherent", "tagline": "6 breaths a minute", "phases": {"inhale": 5, "exhale": 5}}
            ]"#,
        )
        .unwrap();

        catalog.merge(extra);

        assert_eq!(catalog.len(), 4);
        assert_eq!(
            catalog.get(&PatternId::Coherent).unwrap().phases.inhale,
            secs(5.0)
        );
        let triangle = PatternId::Custom("triangle".into());
        assert_eq!(catalog.next_after(&PatternId::Coherent).id, triangle);
        assert_eq!(catalog.next_after(&triangle).id, PatternId::Box);
        assert_eq!(catalog.previous_before(&PatternId::Box).id, triangle);
    }

    #[test]
    fn test_catalog_rejects_negative_and_empty_patterns() {
        let negative = PatternCatalog::parse(
            r#"[{"id": "bad", "name": "Bad", "phases": {"inhale": -1}}]"#,
        );
        assert!(negative.is_err());

        let empty = PatternCatalog::parse(r#"[{"id": "none", "name": "None", "phases": {}}]"#);
        assert!(empty.is_err());
    }

    #[test]
    fn test_resolve_falls_back_to_box() {
        let catalog = PatternCatalog::builtin();
        let p = catalog.resolve(&PatternId::Custom("missing".into()));
        assert_eq!(p.id, PatternId::Box);
    }
}
