//! Per-gesture trigger state machine: activation edges in, action pulses out.
//!
//! All timing is taken from frame timestamps; expiry is polled on the next
//! frame, never slept on. Cooldown is a hard lower bound between consecutive
//! emissions for one gesture, measured from the previous emission, whatever
//! the mode.

use super::classifier::Edge;
use crate::config::TriggerMode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerPulse {
    /// Discrete firing (single press, matured hold, and toggle flips feed
    /// the chain matcher through Engaged/Released below).
    Fired,
    Engaged,
    Released,
    Analog(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// Activation seen, hold timer running.
    Arming { since: u64 },
    /// Fired while still held; waits for release.
    Latched,
}

#[derive(Debug, Clone)]
pub struct TriggerMachine {
    mode: TriggerMode,
    hold_ms: u64,
    cooldown_ms: u64,
    state: State,
    active: bool,
    toggled_on: bool,
    last_emit: Option<u64>,
    last_analog: f32,
}

impl TriggerMachine {
    pub fn new(mode: TriggerMode, hold_ms: u64, cooldown_ms: u64) -> Self {
        Self {
            mode,
            hold_ms,
            cooldown_ms,
            state: State::Idle,
            active: false,
            toggled_on: false,
            last_emit: None,
            last_analog: 0.0,
        }
    }

    fn gate_open(&self, now: u64) -> bool {
        self.last_emit
            .map_or(true, |t| now.saturating_sub(t) >= self.cooldown_ms)
    }

    /// Advance one frame. `magnitude` is the analog magnitude for this frame,
    /// or None when the gesture's metric was missing (no change).
    pub fn update(&mut self, now: u64, edge: Option<Edge>, magnitude: Option<f32>) -> Option<TriggerPulse> {
        match edge {
            Some(Edge::Activated) => self.active = true,
            Some(Edge::Deactivated) => self.active = false,
            None => {}
        }

        match self.mode {
            TriggerMode::Single => {
                // fires on the edge only; an edge inside cooldown is dropped,
                // so one long activation can never double-fire
                if edge == Some(Edge::Activated) && self.gate_open(now) {
                    self.last_emit = Some(now);
                    return Some(TriggerPulse::Fired);
                }
                None
            }
            TriggerMode::Hold => {
                match edge {
                    Some(Edge::Activated) => self.state = State::Arming { since: now },
                    Some(Edge::Deactivated) => self.state = State::Idle,
                    None => {}
                }
                if let State::Arming { since } = self.state {
                    if self.active
                        && now.saturating_sub(since) >= self.hold_ms
                        && self.gate_open(now)
                    {
                        self.state = State::Latched;
                        self.last_emit = Some(now);
                        return Some(TriggerPulse::Fired);
                    }
                }
                None
            }
            TriggerMode::Toggle => {
                if edge == Some(Edge::Activated) && self.gate_open(now) {
                    self.toggled_on = !self.toggled_on;
                    self.last_emit = Some(now);
                    return Some(if self.toggled_on {
                        TriggerPulse::Engaged
                    } else {
                        TriggerPulse::Released
                    });
                }
                None
            }
            TriggerMode::Analog => {
                let mag = if !self.active {
                    0.0
                } else {
                    match magnitude {
                        Some(m) => m,
                        None => self.last_analog,
                    }
                };
                if (mag - self.last_analog).abs() > f32::EPSILON {
                    self.last_analog = mag;
                    return Some(TriggerPulse::Analog(mag));
                }
                None
            }
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.toggled_on
    }

    /// Force a toggled-on gesture off (profile swap, shutdown).
    pub fn disengage(&mut self) -> Option<TriggerPulse> {
        if self.toggled_on {
            self.toggled_on = false;
            Some(TriggerPulse::Released)
        } else {
            None
        }
    }
}
