// src/test_utils.rs

//! Shared unit-test fixtures: recording pins and timers, and a fully
//! wired core over them.

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::{Config, MOTORS};
use crate::hal::{ControlTimer, ControlTimers, GpioOut, IrqPriority};
use crate::stepper::{Motor, StepperCore};

#[derive(Default)]
pub struct PinState {
    pub level: bool,
    /// Low-to-high transitions observed.
    pub rises: u32,
    pub sets: u32,
    pub clears: u32,
    /// Marks the pin as unmapped; the core must then never write it.
    pub null: bool,
}

/// A pin that records every write. Clones share state, so the bench can
/// keep a handle to each pin it gave the core.
#[derive(Clone, Default)]
pub struct MockPin {
    pub state: Rc<RefCell<PinState>>,
}

impl GpioOut for MockPin {
    fn set(&mut self) {
        let mut state = self.state.borrow_mut();
        if !state.level {
            state.level = true;
            state.rises += 1;
        }
        state.sets += 1;
    }

    fn clear(&mut self) {
        let mut state = self.state.borrow_mut();
        state.level = false;
        state.clears += 1;
    }

    fn is_null(&self) -> bool {
        self.state.borrow().null
    }
}

#[derive(Default)]
pub struct TimerState {
    pub frequency: u32,
    pub priority: Option<IrqPriority>,
    pub running: bool,
    pub pending: bool,
    pub starts: u32,
    pub stops: u32,
    /// `set_pending` invocations, including ones that found the interrupt
    /// already pending.
    pub pendings: u32,
}

#[derive(Clone, Default)]
pub struct MockTimer {
    pub state: Rc<RefCell<TimerState>>,
}

impl ControlTimer for MockTimer {
    fn configure(&mut self, frequency_hz: u32, priority: IrqPriority) {
        let mut state = self.state.borrow_mut();
        state.frequency = frequency_hz;
        state.priority = Some(priority);
    }

    fn start(&mut self) {
        let mut state = self.state.borrow_mut();
        state.running = true;
        state.starts += 1;
    }

    fn stop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.running = false;
        state.stops += 1;
    }

    fn set_pending(&mut self) {
        let mut state = self.state.borrow_mut();
        state.pending = true;
        state.pendings += 1;
    }

    fn acknowledge(&mut self) {
        self.state.borrow_mut().pending = false;
    }
}

/// A core wired to mock pins and timers, with bench-side handles to all
/// of the shared state.
pub struct Bench {
    pub core: StepperCore<MockPin, MockTimer>,
    pub step: [MockPin; MOTORS],
    pub dir: [MockPin; MOTORS],
    pub enable: [MockPin; MOTORS],
    pub ms0: [MockPin; MOTORS],
    pub ms1: [MockPin; MOTORS],
    pub enable_pin: MockPin,
    pub dda: MockTimer,
    pub dwell: MockTimer,
    pub load: MockTimer,
    pub exec: MockTimer,
}

pub fn bench(config: Config) -> Bench {
    let step: [MockPin; MOTORS] = core::array::from_fn(|_| MockPin::default());
    let dir: [MockPin; MOTORS] = core::array::from_fn(|_| MockPin::default());
    let enable: [MockPin; MOTORS] = core::array::from_fn(|_| MockPin::default());
    let ms0: [MockPin; MOTORS] = core::array::from_fn(|_| MockPin::default());
    let ms1: [MockPin; MOTORS] = core::array::from_fn(|_| MockPin::default());
    let vref: [MockPin; MOTORS] = core::array::from_fn(|_| MockPin::default());

    let motors: [Motor<MockPin>; MOTORS] = core::array::from_fn(|i| Motor {
        step: step[i].clone(),
        dir: dir[i].clone(),
        enable: enable[i].clone(),
        ms0: ms0[i].clone(),
        ms1: ms1[i].clone(),
        vref: vref[i].clone(),
    });

    let enable_pin = MockPin::default();
    let dda = MockTimer::default();
    let dwell = MockTimer::default();
    let load = MockTimer::default();
    let exec = MockTimer::default();
    let timers = ControlTimers {
        dda: dda.clone(),
        dwell: dwell.clone(),
        load: load.clone(),
        exec: exec.clone(),
    };

    let core = StepperCore::new(motors, enable_pin.clone(), timers, config);
    Bench {
        core,
        step,
        dir,
        enable,
        ms0,
        ms1,
        enable_pin,
        dda,
        dwell,
        load,
        exec,
    }
}
