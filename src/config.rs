// src/config.rs

//! Constants and per-motor configuration.

/// Number of motor channels the core drives.
pub const MOTORS: usize = 6;

/// Magic word stamped into both state blocks for memory-integrity checks.
pub const MAGIC: u16 = 0x12EF;

/// Microstep modes encodable on the driver's MS0/MS1 pins.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MicrostepMode {
    Full = 1,
    Half = 2,
    Quarter = 4,
    Eighth = 8,
}

/// Whether a motor stays energized when a segment ends with it idle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    /// Keep the enable pin asserted between segments.
    #[default]
    AlwaysOn,
    /// Deassert the enable pin when a segment completes.
    HoldOff,
}

/// Per-motor configuration, read-only to the core.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorConfig {
    /// Inverts the direction sense, for axes wired backwards.
    pub polarity: bool,
    pub power_mode: PowerMode,
    pub microsteps: MicrostepMode,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            polarity: false,
            power_mode: PowerMode::AlwaysOn,
            microsteps: MicrostepMode::Eighth,
        }
    }
}

/// Core-wide timing configuration.
///
/// Defaults describe a 200 kHz DDA clock with a 1024x substep scale and a
/// 100 kHz dwell clock.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// DDA (pulse) timer frequency in Hz.
    pub frequency_dda: u32,
    /// Dwell timer frequency in Hz.
    pub frequency_dwell: u32,
    /// Nominal frequency programmed into the software-interrupt timers.
    pub frequency_swi: u32,
    /// Substep scale applied to the per-motor increments and the
    /// accumulator modulus. Larger values bound pulse timing error
    /// tighter; powers of two keep the multiplies cheap.
    pub substeps: u32,
    /// Anti-stall factor: a segment more than this many times faster than
    /// its predecessor gets its DDA accumulators re-seeded at load.
    pub counter_reset_factor: u32,
    /// Segments shorter than this many microseconds are rejected.
    pub min_segment_us: f32,
    /// Busy-wait iterations inserted before the trailing step-pin clear,
    /// for drivers that need a wider high pulse.
    pub pulse_stretch_loops: u32,
    pub motors: [MotorConfig; MOTORS],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frequency_dda: 200_000,
            frequency_dwell: 100_000,
            frequency_swi: 100_000,
            substeps: 1024,
            counter_reset_factor: 2,
            min_segment_us: 0.0,
            pulse_stretch_loops: 0,
            motors: [MotorConfig::default(); MOTORS],
        }
    }
}
