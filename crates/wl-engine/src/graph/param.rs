//! Time-automated node parameters.

/// One scheduled change on an [`AudioParam`].
#[derive(Clone, Copy, Debug, PartialEq)]
enum ParamEvent {
    /// Jump to `value` at `time`.
    Set { time: f64, value: f32 },
    /// Ramp linearly from the previous event's value, reaching `value` at `time`.
    Ramp { time: f64, value: f32 },
}

impl ParamEvent {
    fn time(&self) -> f64 {
        match *self {
            ParamEvent::Set { time, .. } | ParamEvent::Ramp { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            ParamEvent::Set { value, .. } | ParamEvent::Ramp { value, .. } => value,
        }
    }
}

/// A node parameter: a base value plus a time-ordered list of set and
/// linear-ramp events, evaluated against the context clock.
///
/// A ramp starts at the event before it. With no earlier event the ramp
/// degenerates into a jump at its end time, so callers anchor ramps with
/// [`AudioParam::set_value_at_time`] first.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioParam {
    base: f32,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self { base: value, events: Vec::new() }
    }

    /// Set the value immediately, dropping all automation.
    pub fn set_value(&mut self, value: f32) {
        self.base = value;
        self.events.clear();
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::Set { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::Ramp { time, value });
    }

    /// Drop every event at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    /// Freeze the parameter at its value at `time`: later events are
    /// dropped and a set event anchors the held value.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) -> f32 {
        let held = self.value_at(time);
        self.cancel_scheduled_values(time);
        self.set_value_at_time(held, time);
        held
    }

    /// Value at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        let idx = self.events.partition_point(|e| e.time() <= time);
        let (prev_time, prev_value) = match idx.checked_sub(1).map(|i| self.events[i]) {
            Some(e) => (Some(e.time()), e.value()),
            None => (None, self.base),
        };
        match (self.events.get(idx), prev_time) {
            (Some(&ParamEvent::Ramp { time: end, value }), Some(start)) if end > start => {
                let t = ((time - start) / (end - start)) as f32;
                prev_value + (value - prev_value) * t
            }
            _ => prev_value,
        }
    }

    /// Value after every scheduled event has run.
    pub fn final_value(&self) -> f32 {
        self.events.last().map_or(self.base, ParamEvent::value)
    }

    pub fn has_automation(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Fold events that can no longer affect values at or after `now`
    /// into the base value.
    pub fn prune(&mut self, now: f64) {
        while let Some(first) = self.events.first().copied() {
            if first.time() > now {
                break;
            }
            match self.events.get(1) {
                Some(next) if next.time() <= now => {}
                // still the start point of a running ramp
                Some(ParamEvent::Ramp { .. }) => break,
                _ => {}
            }
            self.base = first.value();
            self.events.remove(0);
        }
    }

    fn insert(&mut self, event: ParamEvent) {
        let at = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(at, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_value_without_events() {
        let p = AudioParam::new(0.5);
        assert_eq!(p.value_at(0.0), 0.5);
        assert_eq!(p.value_at(100.0), 0.5);
    }

    #[test]
    fn anchored_ramp_interpolates() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 1.0);
        p.linear_ramp_to_value_at_time(1.0, 2.0);
        assert_eq!(p.value_at(0.5), 0.0);
        assert!((p.value_at(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(p.value_at(2.0), 1.0);
        assert_eq!(p.value_at(3.0), 1.0);
    }

    #[test]
    fn unanchored_ramp_jumps_at_end() {
        let mut p = AudioParam::new(0.25);
        p.linear_ramp_to_value_at_time(1.0, 2.0);
        assert_eq!(p.value_at(1.9), 0.25);
        assert_eq!(p.value_at(2.0), 1.0);
    }

    #[test]
    fn events_stay_sorted() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(3.0, 3.0);
        p.set_value_at_time(1.0, 1.0);
        p.set_value_at_time(2.0, 2.0);
        assert_eq!(p.value_at(1.5), 1.0);
        assert_eq!(p.value_at(2.5), 2.0);
        assert_eq!(p.final_value(), 3.0);
    }

    #[test]
    fn cancel_drops_later_events() {
        let mut p = AudioParam::new(1.0);
        p.set_value_at_time(0.5, 1.0);
        p.set_value_at_time(0.0, 2.0);
        p.cancel_scheduled_values(1.5);
        assert_eq!(p.value_at(5.0), 0.5);
        p.cancel_scheduled_values(f64::NEG_INFINITY);
        assert!(!p.has_automation());
        assert_eq!(p.value_at(5.0), 1.0);
    }

    #[test]
    fn cancel_and_hold_freezes_mid_ramp() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 0.0);
        p.linear_ramp_to_value_at_time(1.0, 1.0);
        let held = p.cancel_and_hold_at_time(0.5);
        assert!((held - 0.5).abs() < 1e-6);
        assert!((p.value_at(0.9) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn prune_keeps_running_ramp_anchor() {
        let mut p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 0.0);
        p.linear_ramp_to_value_at_time(1.0, 1.0);
        p.set_value_at_time(0.2, 2.0);

        p.prune(0.5);
        assert_eq!(p.event_count(), 3);
        assert!((p.value_at(0.5) - 0.5).abs() < 1e-6);

        p.prune(1.5);
        assert_eq!(p.event_count(), 1);
        assert_eq!(p.value_at(1.5), 1.0);
        assert_eq!(p.value_at(2.5), 0.2);

        p.prune(3.0);
        assert!(!p.has_automation());
        assert_eq!(p.value_at(3.0), 0.2);
    }
}
