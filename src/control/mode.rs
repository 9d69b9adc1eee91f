//! Assist mode selection: reverse-pedal gesture plus an external entry point.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::config::{AssistProfileTable, MODE_SWITCH_STEPS};
use crate::events::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeError {
    OutOfRange { requested: i32, available: usize },
}

/// Thread-safe mode change requests from outside the sensing task.
///
/// Requests are validated on the caller's side, then handed over as a
/// latest-value signal; the sensing task applies them on its next cycle.
pub struct ModeControl {
    profiles: AssistProfileTable,
    request: Signal<CriticalSectionRawMutex, u8>,
}

impl ModeControl {
    pub const fn new(profiles: AssistProfileTable) -> Self {
        Self {
            profiles,
            request: Signal::new(),
        }
    }

    pub fn set_mode(&self, index: i32) -> Result<u8, ModeError> {
        let available = self.profiles.len();
        match u8::try_from(index) {
            Ok(mode) if (mode as usize) < available => {
                self.request.signal(mode);
                Ok(mode)
            }
            _ => Err(ModeError::OutOfRange { requested: index, available }),
        }
    }

    pub fn take_request(&self) -> Option<u8> {
        self.request.try_take()
    }
}

pub static MODE_CONTROL: ModeControl = ModeControl::new(AssistProfileTable::builtin());

/// Owned by the sensing task.
pub struct ModeSelector {
    profiles: AssistProfileTable,
    mode: u8,
    // one advance per reverse excursion
    latched: bool,
    light_on: bool,
}

impl ModeSelector {
    pub fn new(profiles: AssistProfileTable) -> Self {
        let light_on = profiles.get(0).is_some_and(|p| p.has_light);
        Self {
            profiles,
            mode: 0,
            latched: false,
            light_on,
        }
    }

    /// Gesture check against the decoder position, once per cycle.
    pub fn evaluate(&mut self, position: i32) -> Option<Event> {
        let mut event = None;
        if position <= -MODE_SWITCH_STEPS {
            if !self.latched {
                self.mode = ((self.mode as usize + 1) % self.profiles.len()) as u8;
                self.latched = true;
                event = Some(Event::ModeChanged {
                    mode: self.mode,
                    reverse_steps: -position,
                });
            }
        } else if position == 0 {
            self.latched = false;
        }
        self.refresh_light();
        event
    }

    /// Direct mode change; ignores the gesture latch.
    pub fn apply(&mut self, mode: u8) -> Result<(), ModeError> {
        if mode as usize >= self.profiles.len() {
            return Err(ModeError::OutOfRange {
                requested: mode as i32,
                available: self.profiles.len(),
            });
        }
        self.mode = mode;
        self.refresh_light();
        info!("mode set to {} ({})", mode, self.profiles.name(mode as usize));
        Ok(())
    }

    fn refresh_light(&mut self) {
        self.light_on = self.profiles.get(self.mode as usize).is_some_and(|p| p.has_light);
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn light_on(&self) -> bool {
        self.light_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> ModeSelector {
        ModeSelector::new(AssistProfileTable::builtin())
    }

    #[test]
    fn three_reverse_steps_advance_once() {
        let mut s = selector();
        for p in [-1, -2] {
            assert!(s.evaluate(p).is_none());
        }
        assert_eq!(s.evaluate(-3), Some(Event::ModeChanged { mode: 1, reverse_steps: 3 }));
        for p in [-4, -5, -3, -2, -1, -3, -6] {
            assert!(s.evaluate(p).is_none());
        }
        assert_eq!(s.mode(), 1);
    }

    #[test]
    fn latch_resets_only_at_zero() {
        let mut s = selector();
        s.evaluate(-3);
        s.evaluate(-1);
        s.evaluate(2);
        s.evaluate(-3);
        assert_eq!(s.mode(), 1);

        s.evaluate(0);
        s.evaluate(-3);
        assert_eq!(s.mode(), 2);
    }

    #[test]
    fn mode_wraps_around_profile_count() {
        let mut s = selector();
        for _ in 0..4 {
            s.evaluate(-3);
            s.evaluate(0);
        }
        assert_eq!(s.mode(), 0);
    }

    #[test]
    fn light_follows_current_profile() {
        let mut s = selector();
        assert!(s.light_on());
        s.evaluate(-3);
        assert!(s.light_on());
        s.evaluate(0);
        s.evaluate(-3);
        assert_eq!(s.mode(), 2);
        assert!(!s.light_on());
    }

    #[test]
    fn apply_bypasses_latch_and_sets_light() {
        let mut s = selector();
        s.evaluate(-3);
        assert_eq!(s.apply(3), Ok(()));
        assert_eq!(s.mode(), 3);
        assert!(!s.light_on());
        assert_eq!(s.apply(0), Ok(()));
        assert!(s.light_on());
        // still latched from the earlier gesture
        assert!(s.evaluate(-4).is_none());
        assert_eq!(s.apply(4), Err(ModeError::OutOfRange { requested: 4, available: 4 }));
        assert_eq!(s.mode(), 0);
    }

    #[test]
    fn set_mode_validates_then_posts_latest() {
        let control = ModeControl::new(AssistProfileTable::builtin());
        assert_eq!(control.set_mode(-1), Err(ModeError::OutOfRange { requested: -1, available: 4 }));
        assert_eq!(control.set_mode(4), Err(ModeError::OutOfRange { requested: 4, available: 4 }));
        assert_eq!(control.take_request(), None);

        assert_eq!(control.set_mode(2), Ok(2));
        assert_eq!(control.set_mode(3), Ok(3));
        assert_eq!(control.take_request(), Some(3));
        assert_eq!(control.take_request(), None);
    }
}
