//! Period ↔ frequency conversion for the two tracker pitch models.
//!
//! Amiga pitch is inverse: `frequency = constant / period`, with finetune
//! resolved through the ProTracker period table (stretched over ten octaves
//! in FastTracker's Amiga mode). Linear pitch (FastTracker 2)
//! is exponential in a period-like value and finetune shifts the period
//! directly by `finetune / 2`.
//!
//! The engine picks one [`PitchModel`] per tracker-mode change instead of
//! branching on the mode at every call site.

use core::fmt::Debug;

use serde::Deserialize;
use tracing::debug;

use crate::error::EngineError;

/// Half the Amiga PAL clock. Frequency of ProTracker periods.
pub const AMIGA_PAL_HALF: f32 = 3_546_894.6;

/// Amiga-period constant used by FastTracker in Amiga frequency mode
/// (8363 Hz · 1712 / 2).
pub const PC_FREQUENCY_HALF: f32 = 7_158_728.0;

/// Linear pitch: playback rate at `LINEAR_ORIGIN`.
pub const LINEAR_BASE_RATE: f32 = 8363.0;

/// Linear pitch: period of C-4.
pub const LINEAR_ORIGIN: f32 = 4608.0;

/// Linear pitch: period units per octave.
pub const LINEAR_SCALE: f32 = 768.0;

/// Linear pitch: period units per semitone.
pub const LINEAR_SEMITONE: f32 = 64.0;

/// Linear period of note index 0.
const LINEAR_TOP: f32 = 7680.0;

/// Linear pitch covers notes 0..120.
const LINEAR_NOTES: u8 = 120;

/// Lowest Amiga period reachable through the finetune table.
pub const AMIGA_PERIOD_MIN: f32 = 108.0;

/// Highest Amiga period reachable through the finetune table.
pub const AMIGA_PERIOD_MAX: f32 = 907.0;

pub const LINEAR_PERIOD_MIN: f32 = 1.0;
pub const LINEAR_PERIOD_MAX: f32 = LINEAR_TOP + LINEAR_SEMITONE;

/// FastTracker Amiga mode covers notes 0..120 (C-0..B-9).
const FT_AMIGA_NOTES: i32 = 120;

/// FastTracker Amiga note that plays the first table entry (C-4).
const FT_AMIGA_C4: i32 = 48;

/// FastTracker Amiga period range: the table stretched from C-0 at
/// finetune -128 up to B-9 at finetune 127.
pub const FT_AMIGA_PERIOD_MIN: f32 = 431.0 / 32.0;
pub const FT_AMIGA_PERIOD_MAX: f32 = AMIGA_PERIOD_MAX * 16.0;

/// Note index of the first table entry (C-1, period 856).
const AMIGA_FIRST_NOTE: i32 = 36;

/// Notes per finetune row (three octaves).
const AMIGA_TABLE_NOTES: usize = 36;

/// ProTracker period table. Rows are finetune 0..7 followed by -8..-1,
/// so the row index is `finetune & 0x0F`.
#[rustfmt::skip]
const PERIOD_TABLE: [[u16; AMIGA_TABLE_NOTES]; 16] = [
    [856,808,762,720,678,640,604,570,538,508,480,453, 428,404,381,360,339,320,302,285,269,254,240,226, 214,202,190,180,170,160,151,143,135,127,120,113],
    [850,802,757,715,674,637,601,567,535,505,477,450, 425,401,379,357,337,318,300,284,268,253,239,225, 213,201,189,179,169,159,150,142,134,126,119,113],
    [844,796,752,709,670,632,597,563,532,502,474,447, 422,398,376,355,335,316,298,282,266,251,237,224, 211,199,188,177,167,158,149,141,133,125,118,112],
    [838,791,746,704,665,628,592,559,528,498,470,444, 419,395,373,352,332,314,296,280,264,249,235,222, 209,198,187,176,166,157,148,140,132,125,118,111],
    [832,785,741,699,660,623,588,555,524,495,467,441, 416,392,370,350,330,312,294,278,262,247,233,220, 208,196,185,175,165,156,147,139,131,124,117,110],
    [826,779,736,694,655,619,584,551,520,491,463,437, 413,390,368,347,328,309,292,276,260,245,232,219, 206,195,184,174,164,155,146,138,130,123,116,109],
    [820,774,730,689,651,614,580,547,516,487,460,434, 410,387,365,345,325,307,290,274,258,244,230,217, 205,193,183,172,163,154,145,137,129,122,115,109],
    [814,768,725,684,646,610,575,543,513,484,457,431, 407,384,363,342,323,305,288,272,256,242,228,216, 204,192,181,171,161,152,144,136,128,121,114,108],
    [907,856,808,762,720,678,640,604,570,538,508,480, 453,428,404,381,360,340,320,302,285,269,254,240, 226,214,202,190,180,170,160,151,143,135,127,120],
    [900,850,802,757,715,675,636,601,567,535,505,477, 450,425,401,379,357,337,318,300,284,268,253,238, 225,212,200,189,179,169,159,150,142,134,126,119],
    [894,844,796,752,709,670,632,597,563,532,502,474, 447,422,398,376,355,335,316,298,282,266,251,237, 223,211,199,188,177,167,158,149,141,133,125,118],
    [887,838,791,746,704,665,628,592,559,528,498,470, 444,419,395,373,352,332,314,296,280,264,249,235, 222,209,198,187,176,166,157,148,140,132,125,118],
    [881,832,785,741,699,660,623,588,555,524,494,467, 441,416,392,370,350,330,312,294,278,262,247,233, 220,208,196,185,175,165,156,147,139,131,123,117],
    [875,826,779,736,694,655,619,584,551,520,491,463, 437,413,390,368,347,328,309,292,276,260,245,232, 219,206,195,184,174,164,155,146,138,130,123,116],
    [868,820,774,730,689,651,614,580,547,516,487,460, 434,410,387,365,345,325,307,290,274,258,244,230, 217,205,193,183,172,163,154,145,137,129,122,115],
    [862,814,768,725,684,646,610,575,543,513,484,457, 431,407,384,363,342,323,305,288,272,256,242,228, 216,203,192,181,171,161,152,144,136,128,121,114],
];

/// Which tracker's pitch semantics are active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerMode {
    /// ProTracker: Amiga periods, PAL clock.
    #[default]
    ProTracker,
    /// FastTracker 2 with the Amiga frequency table.
    FastTrackerAmiga,
    /// FastTracker 2 with linear frequencies.
    FastTrackerLinear,
}

impl TrackerMode {
    /// FastTracker-family modes (both frequency tables).
    pub fn is_fasttracker_family(self) -> bool {
        !matches!(self, TrackerMode::ProTracker)
    }

    /// Build the pitch model for this mode.
    pub fn pitch_model(self) -> Box<dyn PitchModel> {
        match self {
            TrackerMode::ProTracker => Box::new(AmigaPitch::new(self, AMIGA_PAL_HALF)),
            TrackerMode::FastTrackerAmiga => Box::new(AmigaPitch::new(self, PC_FREQUENCY_HALF)),
            TrackerMode::FastTrackerLinear => Box::new(LinearPitch),
        }
    }
}

/// Pure pitch conversions for one tracker mode.
///
/// None of these clamp unless stated; callers clamp with
/// [`PitchModel::clamp_period`] before converting to a playback rate.
pub trait PitchModel: Send + Sync + Debug {
    fn mode(&self) -> TrackerMode;

    /// Playback frequency in Hz for `period`.
    fn frequency(&self, period: f32) -> f32;

    /// Apply a sample's finetune to `period`.
    fn apply_finetune(&self, period: f32, finetune: i8) -> f32;

    /// Snap `period` to the nearest tabulated note for `finetune`.
    fn nearest_semitone(&self, period: f32, finetune: i8) -> f32;

    /// The period `delta` semitones away from `period`, finetune re-applied.
    fn semitone_offset(&self, period: f32, finetune: i8, delta: i32) -> f32;

    /// Period of note index `note` (C-4 = 48).
    fn note_period(&self, note: u8, finetune: i8) -> f32;

    /// Clamp to the model's valid range.
    fn clamp_period(&self, period: f32) -> f32;

    /// Playback rate relative to a context running at `sample_rate`.
    fn playback_rate(&self, period: f32, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.frequency(self.clamp_period(period)) / sample_rate as f32
    }
}

/// Non-linear Amiga period pitch.
///
/// ProTracker plays the three-octave table as is (C-1 = 856). FastTracker
/// in Amiga mode spreads the first table octave over ten octaves with
/// C-4 = 856, and reads its -128..=127 finetune as one table row per 16
/// steps.
#[derive(Clone, Copy, Debug)]
pub struct AmigaPitch {
    mode: TrackerMode,
    constant: f32,
}

impl AmigaPitch {
    pub fn new(mode: TrackerMode, constant: f32) -> Self {
        Self { mode, constant }
    }

    fn extended(&self) -> bool {
        self.mode.is_fasttracker_family()
    }

    fn row(&self, finetune: i8) -> Result<&'static [u16; AMIGA_TABLE_NOTES], EngineError> {
        let index = if self.extended() {
            finetune >> 4
        } else if (-8..=7).contains(&finetune) {
            finetune
        } else {
            return Err(EngineError::LookupMiss(format!("finetune {finetune}")));
        };
        Ok(&PERIOD_TABLE[(index as u8 & 0x0F) as usize])
    }

    /// Row for `finetune`, falling back to the untuned row on a miss.
    fn row_or_default(&self, finetune: i8) -> &'static [u16; AMIGA_TABLE_NOTES] {
        self.row(finetune).unwrap_or_else(|e| {
            debug!(error = %e, "using untuned period row");
            &PERIOD_TABLE[0]
        })
    }

    /// First and last playable note index.
    fn notes(&self) -> (i32, i32) {
        if self.extended() {
            (0, FT_AMIGA_NOTES - 1)
        } else {
            (AMIGA_FIRST_NOTE, AMIGA_FIRST_NOTE + AMIGA_TABLE_NOTES as i32 - 1)
        }
    }

    /// Period of `note` in `row`. `note` must be within [`Self::notes`].
    fn period_at(&self, row: &[u16; AMIGA_TABLE_NOTES], note: i32) -> f32 {
        if self.extended() {
            let rel = note - FT_AMIGA_C4;
            libm::ldexpf(row[rel.rem_euclid(12) as usize] as f32, -rel.div_euclid(12))
        } else {
            row[(note - AMIGA_FIRST_NOTE) as usize] as f32
        }
    }

    /// Note whose period in `row` is closest to `period`; ties keep the
    /// lower note.
    fn nearest_note(&self, row: &[u16; AMIGA_TABLE_NOTES], period: f32) -> i32 {
        let (first, last) = self.notes();
        let mut best = first;
        let mut best_delta = f32::INFINITY;
        for note in first..=last {
            let delta = (self.period_at(row, note) - period).abs();
            if delta < best_delta {
                best = note;
                best_delta = delta;
            }
        }
        best
    }

    /// Note whose untuned period is `period`.
    fn exact_note(&self, period: f32) -> Result<i32, EngineError> {
        let row = &PERIOD_TABLE[0];
        let note = self.nearest_note(row, period);
        let found = self.period_at(row, note);
        let tolerance = if self.extended() { found * 1e-3 } else { 0.5 };
        if (found - period).abs() < tolerance {
            Ok(note)
        } else {
            Err(EngineError::LookupMiss(format!("period {period}")))
        }
    }
}

impl PitchModel for AmigaPitch {
    fn mode(&self) -> TrackerMode {
        self.mode
    }

    fn frequency(&self, period: f32) -> f32 {
        if period <= 0.0 {
            return 0.0;
        }
        self.constant / period
    }

    fn apply_finetune(&self, period: f32, finetune: i8) -> f32 {
        let lookup = self
            .exact_note(period)
            .and_then(|note| Ok(self.period_at(self.row(finetune)?, note)));
        match lookup {
            Ok(tuned) => tuned,
            Err(e) => {
                debug!(error = %e, period, finetune, "finetune left period unchanged");
                period
            }
        }
    }

    fn nearest_semitone(&self, period: f32, finetune: i8) -> f32 {
        let row = self.row_or_default(finetune);
        self.period_at(row, self.nearest_note(row, period))
    }

    fn semitone_offset(&self, period: f32, finetune: i8, delta: i32) -> f32 {
        let row = self.row_or_default(finetune);
        let root = self.nearest_note(row, period);
        let (first, last) = self.notes();
        let target = root + delta;
        if !(first..=last).contains(&target) {
            debug!(root, delta, "semitone offset clamped to the period table");
        }
        self.period_at(row, target.clamp(first, last))
    }

    fn note_period(&self, note: u8, finetune: i8) -> f32 {
        let (first, last) = self.notes();
        let note = note as i32;
        if !(first..=last).contains(&note) {
            debug!(note, "note outside the Amiga period range");
        }
        self.period_at(self.row_or_default(finetune), note.clamp(first, last))
    }

    fn clamp_period(&self, period: f32) -> f32 {
        if self.extended() {
            period.clamp(FT_AMIGA_PERIOD_MIN, FT_AMIGA_PERIOD_MAX)
        } else {
            period.clamp(AMIGA_PERIOD_MIN, AMIGA_PERIOD_MAX)
        }
    }
}

/// FastTracker 2 linear pitch.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearPitch;

impl PitchModel for LinearPitch {
    fn mode(&self) -> TrackerMode {
        TrackerMode::FastTrackerLinear
    }

    fn frequency(&self, period: f32) -> f32 {
        LINEAR_BASE_RATE * libm::exp2f((LINEAR_ORIGIN - period) / LINEAR_SCALE)
    }

    fn apply_finetune(&self, period: f32, finetune: i8) -> f32 {
        period - finetune as f32 / 2.0
    }

    fn nearest_semitone(&self, period: f32, finetune: i8) -> f32 {
        let mut best = self.note_period(0, finetune);
        let mut best_delta = (best - period).abs();
        for note in 1..LINEAR_NOTES {
            let candidate = self.note_period(note, finetune);
            let delta = (candidate - period).abs();
            if delta < best_delta {
                best = candidate;
                best_delta = delta;
            }
        }
        best
    }

    fn semitone_offset(&self, period: f32, finetune: i8, delta: i32) -> f32 {
        let untuned = period + finetune as f32 / 2.0;
        let shifted = untuned - delta as f32 * LINEAR_SEMITONE;
        self.clamp_period(self.apply_finetune(shifted, finetune))
    }

    fn note_period(&self, note: u8, finetune: i8) -> f32 {
        let note = note.min(LINEAR_NOTES - 1);
        self.apply_finetune(LINEAR_TOP - note as f32 * LINEAR_SEMITONE, finetune)
    }

    fn clamp_period(&self, period: f32) -> f32 {
        period.clamp(LINEAR_PERIOD_MIN, LINEAR_PERIOD_MAX)
    }
}
