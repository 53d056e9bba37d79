// src/lib.rs

//! Stepper pulse-generation core for a multi-axis motion controller.
//!
//! This crate turns timed per-motor step counts, produced by an upstream
//! motion planner, into precisely spaced step pulses on up to six motor
//! channels. It is the bottom half of a CNC/3D-printer-class controller:
//! no path planning, no kinematics, just the segment-to-pulse pipeline
//! with bounded timing error and no step loss across segment boundaries.
//!
//! The pipeline runs at three interrupt priorities:
//!
//! * exec pass (lowest): pulls the next segment from the planner and
//!   converts it to fixed-point DDA parameters in a staging buffer;
//! * loader (medium): copies the staged segment into the runtime block
//!   and arms the DDA or dwell timer;
//! * tick handlers (highest): the DDA handler advances one phase
//!   accumulator per motor per tick and emits step pulses, the dwell
//!   handler counts down a pause.
//!
//! The staging buffer is a single-slot double buffer whose ownership
//! latch is the only shared-mutable word in the system; the next segment
//! preps while the current one pulses, so the generator never starves
//! between segments.
//!
//! Hardware is reached exclusively through the [`hal`] traits. The host
//! firmware owns the [`StepperCore`], installs its `*_isr` methods in the
//! four timer vectors, and feeds it through a [`Planner`].

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod hal;
pub mod planner;
pub mod stepper;

#[cfg(test)]
mod test_utils;

pub use config::{Config, MicrostepMode, MotorConfig, PowerMode, MAGIC, MOTORS};
pub use hal::{ControlTimer, ControlTimers, EhPin, GpioOut, IrqPriority, NullPin};
pub use planner::{Planner, Segment, SegmentQueue};
pub use stepper::{Motor, PrepError, StepperCore};
