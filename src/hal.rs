// src/hal.rs

//! Hardware seams for the pulse core.
//!
//! The core never touches an MCU register directly. The board hands it pin
//! and timer handles implementing these traits; on a real port every method
//! here should inline down to one or two register writes.

/// A digital output driven by the pulse core.
///
/// `set` and `clear` must each be a single uninterruptible pin write.
/// `is_null` lets a board leave a pin unmapped; the pulse generator skips
/// null step pins before doing any accumulator work.
pub trait GpioOut {
    fn set(&mut self);
    fn clear(&mut self);
    /// True for placeholder pins that are not wired to hardware.
    fn is_null(&self) -> bool {
        false
    }
}

/// Interrupt priority assigned to a control timer at configuration time.
///
/// The tick timers (DDA, dwell) run at `Highest`, the load software
/// interrupt at `Medium`, the exec software interrupt at `Lowest`. The
/// pipeline relies on exactly this ordering.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqPriority {
    Highest,
    Medium,
    Lowest,
}

/// One of the four control timers (DDA, dwell, load SWI, exec SWI).
///
/// The hardware tick timers use `start`/`stop`; the two software-interrupt
/// timers are fired with `set_pending` and never free-run. `acknowledge`
/// clears the interrupt cause at the top of a service routine and must be
/// harmless when nothing is pending.
pub trait ControlTimer {
    /// Set tick frequency and interrupt priority. Called once from init.
    fn configure(&mut self, frequency_hz: u32, priority: IrqPriority);
    fn start(&mut self);
    fn stop(&mut self);
    /// Raise the timer's interrupt from software.
    fn set_pending(&mut self);
    /// Clear the interrupt cause.
    fn acknowledge(&mut self);
}

/// The four control timers a board must provide.
pub struct ControlTimers<T: ControlTimer> {
    pub dda: T,
    pub dwell: T,
    pub load: T,
    pub exec: T,
}

/// A pin that goes nowhere. Boards use it for motor channels (or single
/// pins, like an unwired VREF) that do not exist on the hardware.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullPin;

impl GpioOut for NullPin {
    fn set(&mut self) {}
    fn clear(&mut self) {}
    fn is_null(&self) -> bool {
        true
    }
}

/// Adapter for boards that hold `embedded-hal` v2 output pins.
///
/// Pin errors have nowhere to go from inside a tick handler, so they are
/// discarded; for the usual infallible pins nothing is lost.
pub struct EhPin<T>(pub T);

impl<T: embedded_hal::digital::v2::OutputPin> GpioOut for EhPin<T> {
    fn set(&mut self) {
        let _ = self.0.set_high();
    }

    fn clear(&mut self) {
        let _ = self.0.set_low();
    }
}
