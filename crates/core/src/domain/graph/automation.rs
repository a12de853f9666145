//! Parameter automation timeline
//!
//! Each automated parameter holds a settled value and at most one ramp. A new
//! ramp always replaces the pending one and starts from the value reached at
//! its start time, so rapid control changes never jump back to a stale origin.

use serde::{Deserialize, Serialize};

/// Interpolation curve of a ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RampShape {
    Linear,
    /// Constant ratio per unit time; needs both endpoints on the same side of zero
    Exponential,
}

/// A scheduled transition, carried by value between threads
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ramp {
    pub start_time: f64,
    pub start_value: f32,
    pub end_time: f64,
    pub end_value: f32,
    pub shape: RampShape,
}

impl Ramp {
    /// Value at `time`, held flat before the start and after the end
    pub fn value_at(&self, time: f64) -> f32 {
        if time <= self.start_time {
            return self.start_value;
        }
        if time >= self.end_time {
            return self.end_value;
        }

        let progress = ((time - self.start_time) / (self.end_time - self.start_time)) as f32;
        match self.shape {
            RampShape::Exponential if self.start_value * self.end_value > 0.0 => {
                self.start_value * (self.end_value / self.start_value).powf(progress)
            }
            // Exponential curves through zero are undefined; fall back to linear
            _ => self.start_value + (self.end_value - self.start_value) * progress,
        }
    }
}

/// A live parameter: settled value plus an optional pending ramp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomatedParam {
    value: f32,
    ramp: Option<Ramp>,
}

impl AutomatedParam {
    pub fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    pub fn value_at(&self, time: f64) -> f32 {
        match &self.ramp {
            Some(ramp) => ramp.value_at(time),
            None => self.value,
        }
    }

    /// Value the parameter settles on once automation completes
    pub fn target(&self) -> f32 {
        self.ramp.map_or(self.value, |ramp| ramp.end_value)
    }

    pub fn pending_ramp(&self) -> Option<&Ramp> {
        self.ramp.as_ref()
    }

    /// Whether the value changes anywhere in `[start, end)`
    pub fn is_moving(&self, start: f64, end: f64) -> bool {
        self.ramp
            .is_some_and(|ramp| ramp.end_time > start && ramp.start_time < end)
    }

    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    pub fn cancel_and_hold(&mut self, time: f64) {
        self.value = self.value_at(time);
        self.ramp = None;
    }

    /// Replace any pending automation with `ramp`
    pub fn schedule(&mut self, ramp: Ramp) {
        self.value = ramp.end_value;
        self.ramp = Some(ramp);
    }

    /// Build a ramp from the value at `now` to `target`
    pub fn ramp_from(&self, now: f64, target: f32, end_time: f64, shape: RampShape) -> Ramp {
        Ramp {
            start_time: now,
            start_value: self.value_at(now),
            end_time: end_time.max(now),
            end_value: target,
            shape,
        }
    }

    /// Drop a ramp that finished before `time`
    pub fn settle(&mut self, time: f64) {
        if self.ramp.is_some_and(|ramp| time >= ramp.end_time) {
            self.ramp = None;
        }
    }
}
