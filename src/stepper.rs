// src/stepper.rs

//! Segment-to-pulse pipeline: prep, load, and the two tick generators.
//!
//! Four execution levels cooperate over two single-instance state blocks.
//! The exec pass (lowest priority) converts planner segments into
//! fixed-point DDA parameters in the staging block; the loader (medium)
//! copies a staged segment into the run block while the pulse timer is
//! quiet; the DDA and dwell tick handlers (highest) consume the run block
//! only. Ownership of the staging block is handed back and forth through a
//! single atomic latch, so no other locking exists anywhere in the
//! pipeline.

use core::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use crate::config::{Config, MicrostepMode, PowerMode, MAGIC, MOTORS};
use crate::hal::{ControlTimer, ControlTimers, GpioOut, IrqPriority};
use crate::planner::{Planner, Segment};

/// Errors surfaced by [`StepperCore::prep_line`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrepError {
    /// Prep was called while the staging buffer belonged to the loader.
    /// Indicates a sequencing bug in the caller; nothing was mutated.
    BufferNotOwned,
    /// Segment duration was not finite, or shorter than the configured
    /// minimum. The segment is dropped.
    ZeroLengthMove,
}

/// Staged move kinds understood by the loader.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MoveType {
    None,
    Line,
    Dwell,
}

// Staging-buffer ownership latch. An AtomicU8 rather than a bool or enum
// field: the exec pass and the loader run at different interrupt
// priorities and each writes one of the two values, so the latch must be
// a single un-tearable store in both directions.
const OWNED_BY_LOADER: u8 = 0;
const OWNED_BY_EXEC: u8 = 1;

/// Pin bundle for one motor channel.
pub struct Motor<P: GpioOut> {
    pub step: P,
    pub dir: P,
    pub enable: P,
    pub ms0: P,
    pub ms1: P,
    pub vref: P,
}

impl<P: GpioOut> Motor<P> {
    /// Drive MS0/MS1 to select a microstep mode.
    pub fn set_microsteps(&mut self, mode: MicrostepMode) {
        match mode {
            MicrostepMode::Full => {
                self.ms0.clear();
                self.ms1.clear();
            }
            MicrostepMode::Half => {
                self.ms0.set();
                self.ms1.clear();
            }
            MicrostepMode::Quarter => {
                self.ms0.clear();
                self.ms1.set();
            }
            MicrostepMode::Eighth => {
                self.ms0.set();
                self.ms1.set();
            }
        }
    }
}

/// Per-motor runtime state, owned by the tick handlers.
#[derive(Copy, Clone, Default)]
struct RunMotor {
    /// Accumulator advance per tick: |steps| times the substep scale.
    increment: i32,
    /// DDA phase register. A positive crossing emits a step.
    accumulator: i32,
    /// Steps emitted since init.
    step_count: u32,
}

/// Runtime block. Written by the loader only while the DDA timer is
/// stopped; consumed by the tick handlers.
struct RunState {
    magic_start: u16,
    /// Ticks left in the current segment or dwell. Atomic because the
    /// load-request gate reads it from a lower priority than the tick
    /// handlers that count it down.
    ticks_remaining: AtomicI32,
    /// Accumulator modulus: segment ticks times the substep scale.
    ticks_x_substeps: u32,
    motors: [RunMotor; MOTORS],
    magic_end: u16,
}

/// Per-motor staged parameters.
#[derive(Copy, Clone, Default)]
struct PrepMotor {
    increment: u32,
    /// Direction pin level for the segment, polarity already applied.
    dir: bool,
}

/// Staging block. Written by the exec pass while it holds the ownership
/// latch, read once by the loader at handoff.
struct PrepState {
    magic_start: u16,
    move_type: MoveType,
    exec_state: AtomicU8,
    /// Re-seed the DDA accumulators at load; see `prep_line`.
    counter_reset_flag: bool,
    /// Previous segment's tick count, for the anti-stall comparison.
    prev_ticks: u32,
    timer_ticks: u32,
    timer_ticks_x_substeps: u32,
    motors: [PrepMotor; MOTORS],
    magic_end: u16,
}

/// The pulse-generation core: both state blocks, the motor pins, and the
/// four control timers, held as one owned context.
///
/// The host threads this through `init` and captures it in its four
/// interrupt handlers; each `*_isr` method is the complete body of the
/// corresponding vector. The priority ordering configured at init
/// (DDA/dwell above load above exec, exec above the foreground planner)
/// is what makes the `&mut self` methods sound to call from those
/// vectors: at most one of them is live at any instant.
pub struct StepperCore<P: GpioOut, T: ControlTimer> {
    run: RunState,
    prep: PrepState,
    motors: [Motor<P>; MOTORS],
    /// Board-wide stepper enable, active low.
    enable_pin: P,
    dda_timer: T,
    dwell_timer: T,
    load_timer: T,
    exec_timer: T,
    config: Config,
}

impl<P: GpioOut, T: ControlTimer> StepperCore<P, T> {
    pub fn new(
        motors: [Motor<P>; MOTORS],
        enable_pin: P,
        timers: ControlTimers<T>,
        config: Config,
    ) -> Self {
        Self {
            run: RunState {
                magic_start: 0,
                ticks_remaining: AtomicI32::new(0),
                ticks_x_substeps: 0,
                motors: [RunMotor::default(); MOTORS],
                magic_end: 0,
            },
            prep: PrepState {
                magic_start: 0,
                move_type: MoveType::None,
                exec_state: AtomicU8::new(OWNED_BY_LOADER),
                counter_reset_flag: false,
                prev_ticks: 0,
                timer_ticks: 0,
                timer_ticks_x_substeps: 0,
                motors: [PrepMotor::default(); MOTORS],
                magic_end: 0,
            },
            motors,
            enable_pin,
            dda_timer: timers.dda,
            dwell_timer: timers.dwell,
            load_timer: timers.load,
            exec_timer: timers.exec,
            config,
        }
    }

    /// Zero both state blocks, stamp the integrity words, configure the
    /// four timers, and give the staging buffer to the exec pass.
    pub fn init(&mut self) {
        self.run.magic_start = MAGIC;
        self.run.magic_end = MAGIC;
        self.run.ticks_remaining.store(0, Ordering::Release);
        self.run.ticks_x_substeps = 0;
        self.run.motors = [RunMotor::default(); MOTORS];

        self.prep.magic_start = MAGIC;
        self.prep.magic_end = MAGIC;
        self.prep.move_type = MoveType::None;
        self.prep.counter_reset_flag = false;
        self.prep.prev_ticks = 0;
        self.prep.timer_ticks = 0;
        self.prep.timer_ticks_x_substeps = 0;
        self.prep.motors = [PrepMotor::default(); MOTORS];

        self.dda_timer
            .configure(self.config.frequency_dda, IrqPriority::Highest);
        self.dwell_timer
            .configure(self.config.frequency_dwell, IrqPriority::Highest);
        self.load_timer
            .configure(self.config.frequency_swi, IrqPriority::Medium);
        self.exec_timer
            .configure(self.config.frequency_swi, IrqPriority::Lowest);

        self.prep.exec_state.store(OWNED_BY_EXEC, Ordering::Release);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "pulse core ready: dda {} Hz, substeps {}",
            self.config.frequency_dda,
            self.config.substeps
        );
    }

    /// Assert the board enable and start the pulse timer.
    pub fn enable(&mut self) {
        self.enable_pin.clear();
        self.dda_timer.start();
    }

    /// Stop pulse generation and de-energize every motor.
    ///
    /// A disable in mid-segment abandons the remaining ticks; the staging
    /// buffer is untouched and the next exec request resumes normal flow.
    pub fn disable(&mut self) {
        self.dda_timer.stop();
        self.enable_pin.set();
        for motor in &mut self.motors {
            motor.enable.set();
        }
        self.run.ticks_remaining.store(0, Ordering::Release);
        for state in &mut self.run.motors {
            state.increment = 0;
        }
        #[cfg(feature = "defmt")]
        defmt::trace!("steppers disabled");
    }

    /// True while a segment or dwell is executing.
    pub fn is_busy(&self) -> bool {
        self.run.ticks_remaining.load(Ordering::Acquire) != 0
    }

    /// Both state blocks still carry their integrity stamps.
    pub fn integrity_ok(&self) -> bool {
        self.run.magic_start == MAGIC
            && self.run.magic_end == MAGIC
            && self.prep.magic_start == MAGIC
            && self.prep.magic_end == MAGIC
    }

    /// Steps emitted per motor since `init`.
    pub fn step_counts(&self) -> [u32; MOTORS] {
        let mut counts = [0; MOTORS];
        for (count, state) in counts.iter_mut().zip(self.run.motors.iter()) {
            *count = state.step_count;
        }
        counts
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drive the MS0/MS1 pins of one motor. `motor` is a zero-based index;
    /// out-of-range indexes are ignored.
    pub fn set_microsteps(&mut self, motor: usize, mode: MicrostepMode) {
        if let Some(m) = self.motors.get_mut(motor) {
            m.set_microsteps(mode);
        }
    }

    /// DDA timer interrupt body: one tick of the pulse generator.
    ///
    /// Advances each mapped motor's phase accumulator, raises step pins on
    /// positive crossings, then drops every mapped step pin on the way
    /// out, so pulse width equals the handler's own tail latency and is
    /// identical across motors. Unmapped (null) pins are skipped entirely.
    /// Integer math only; the motor loop has a fixed bound.
    pub fn dda_isr(&mut self) {
        self.dda_timer.acknowledge();

        let ticks = self.run.ticks_remaining.load(Ordering::Relaxed);
        if ticks == 0 {
            // Timer running with no segment loaded (enable without prep).
            return;
        }

        let modulus = self.run.ticks_x_substeps as i32;
        for (state, motor) in self.run.motors.iter_mut().zip(self.motors.iter_mut()) {
            if motor.step.is_null() || state.increment == 0 {
                continue;
            }
            state.accumulator += state.increment;
            if state.accumulator > 0 {
                state.accumulator -= modulus;
                motor.step.set();
                state.step_count = state.step_count.wrapping_add(1);
            }
        }

        for _ in 0..self.config.pulse_stretch_loops {
            core::hint::spin_loop();
        }
        for motor in &mut self.motors {
            if !motor.step.is_null() {
                motor.step.clear();
            }
        }

        let ticks = ticks - 1;
        self.run.ticks_remaining.store(ticks, Ordering::Release);
        if ticks == 0 {
            self.end_of_segment();
        }
    }

    /// End-of-segment bookkeeping, still at tick priority.
    fn end_of_segment(&mut self) {
        for (motor, cfg) in self.motors.iter_mut().zip(self.config.motors.iter()) {
            if cfg.power_mode == PowerMode::HoldOff {
                motor.enable.set();
            }
        }
        self.dda_timer.stop();
        for state in &mut self.run.motors {
            state.increment = 0;
        }
        // Same priority level as the loader; run it inline.
        self.load_move();
    }

    /// Dwell timer interrupt body: count the pause down, then load the
    /// next segment.
    pub fn dwell_isr(&mut self) {
        self.dwell_timer.acknowledge();

        let ticks = self.run.ticks_remaining.load(Ordering::Relaxed);
        if ticks == 0 {
            return;
        }
        let ticks = ticks - 1;
        self.run.ticks_remaining.store(ticks, Ordering::Release);
        if ticks == 0 {
            self.dwell_timer.stop();
            self.load_move();
        }
    }

    /// Load SWI body.
    pub fn load_isr(&mut self) {
        self.load_timer.acknowledge();
        self.load_move();
    }

    /// Exec SWI body: pull one segment from the planner and stage it.
    pub fn exec_isr<PL: Planner>(&mut self, planner: &mut PL) {
        self.exec_timer.acknowledge();
        self.exec_move(planner);
    }

    /// Fire the exec software interrupt, but only while the staging buffer
    /// is the exec pass's to fill; otherwise the interrupt would fire and
    /// find nothing to do.
    pub fn request_exec_move(&mut self) {
        if self.prep.exec_state.load(Ordering::Acquire) == OWNED_BY_EXEC {
            self.exec_timer.set_pending();
        }
    }

    /// Request a load unless a segment is still executing. Loading over a
    /// live run block would corrupt it; the completion path invokes the
    /// loader itself, so a suppressed request is never lost.
    fn request_load_move(&mut self) {
        if self.run.ticks_remaining.load(Ordering::Acquire) == 0 {
            self.load_timer.set_pending();
        }
    }

    fn exec_move<PL: Planner>(&mut self, planner: &mut PL) {
        if self.prep.exec_state.load(Ordering::Acquire) != OWNED_BY_EXEC {
            return;
        }
        match planner.exec_move() {
            Some(Segment::Line {
                steps,
                microseconds,
            }) => {
                // A rejected segment is dropped; the buffer stays with the
                // exec pass and the planner is expected to recover.
                if self.prep_line(&steps, microseconds).is_ok() {
                    self.hand_to_loader();
                }
            }
            Some(Segment::Dwell { microseconds }) => {
                self.prep_dwell(microseconds);
                self.hand_to_loader();
            }
            None => self.prep_null(),
        }
    }

    fn hand_to_loader(&mut self) {
        self.prep.exec_state.store(OWNED_BY_LOADER, Ordering::Release);
        self.request_load_move();
    }

    /// Copy the staged segment into the run block and arm the matching
    /// timer. Runs at load priority, or inline from the tick handlers at
    /// segment end; either way the DDA timer is stopped while this writes.
    fn load_move(&mut self) {
        match self.prep.move_type {
            MoveType::Line => {
                let ticks = self.prep.timer_ticks as i32;
                self.run.ticks_remaining.store(ticks, Ordering::Release);
                self.run.ticks_x_substeps = self.prep.timer_ticks_x_substeps;

                for i in 0..MOTORS {
                    let staged = self.prep.motors[i];
                    let state = &mut self.run.motors[i];
                    state.increment = staged.increment as i32;
                    if self.prep.counter_reset_flag {
                        // Opposite seed signs stagger the two motor groups
                        // so re-seeded axes do not all fire on the same
                        // early tick.
                        state.accumulator = if i < MOTORS / 2 { -ticks } else { ticks };
                    }
                    if staged.increment != 0 {
                        let motor = &mut self.motors[i];
                        if staged.dir {
                            motor.dir.set();
                        } else {
                            motor.dir.clear();
                        }
                        motor.enable.clear();
                    }
                }
                self.enable();
            }
            MoveType::Dwell => {
                self.run
                    .ticks_remaining
                    .store(self.prep.timer_ticks as i32, Ordering::Release);
                self.dwell_timer.start();
            }
            MoveType::None => {}
        }

        // Hand the staging buffer back and let the next segment prep
        // while this one runs.
        self.prep.exec_state.store(OWNED_BY_EXEC, Ordering::Release);
        self.request_exec_move();
    }

    /// Convert a line segment to fixed-point DDA parameters and stage it.
    ///
    /// `steps` are signed, possibly fractional, per-motor step counts;
    /// `microseconds` is the segment duration. Per motor this fixes the
    /// direction pin level (sign XOR polarity) and the accumulator
    /// increment `|steps| * S`; the shared modulus is the integer product
    /// `ticks * S`. Scaling a float here instead accumulates position
    /// error across segments.
    pub fn prep_line(
        &mut self,
        steps: &[f32; MOTORS],
        microseconds: f32,
    ) -> Result<(), PrepError> {
        if self.prep.exec_state.load(Ordering::Acquire) != OWNED_BY_EXEC {
            return Err(PrepError::BufferNotOwned);
        }
        if !microseconds.is_finite() || microseconds < self.config.min_segment_us {
            return Err(PrepError::ZeroLengthMove);
        }
        self.prep.counter_reset_flag = false;

        let substeps = self.config.substeps;
        for i in 0..MOTORS {
            let staged = &mut self.prep.motors[i];
            staged.dir = (steps[i] < 0.0) != self.config.motors[i].polarity;
            staged.increment = round_f32(abs_f32(steps[i]) * substeps as f32) as u32;
        }

        let ticks =
            round_f32(microseconds / 1_000_000.0 * self.config.frequency_dda as f32) as u32;
        self.prep.timer_ticks = ticks;
        self.prep.timer_ticks_x_substeps = ticks * substeps;

        // A segment much faster than its predecessor inherits accumulator
        // phase that can clump its first pulses; flag a re-seed.
        if ticks.wrapping_mul(self.config.counter_reset_factor) < self.prep.prev_ticks {
            self.prep.counter_reset_flag = true;
        }
        self.prep.prev_ticks = ticks;
        self.prep.move_type = MoveType::Line;
        Ok(())
    }

    /// Stage a timed pause.
    pub fn prep_dwell(&mut self, microseconds: f32) {
        self.prep.move_type = MoveType::Dwell;
        self.prep.timer_ticks =
            round_f32(microseconds / 1_000_000.0 * self.config.frequency_dwell as f32) as u32;
    }

    /// Stage a do-nothing move to keep the loader fed (tool changes and
    /// similar non-motion commands).
    pub fn prep_null(&mut self) {
        self.prep.move_type = MoveType::None;
    }
}

#[inline]
fn abs_f32(value: f32) -> f32 {
    micromath::F32Ext::abs(value)
}

#[inline]
fn round_f32(value: f32) -> f32 {
    micromath::F32Ext::round(value)
}
