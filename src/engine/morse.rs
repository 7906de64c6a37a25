//! Morse-style temporal decoding: successive hold durations on one gesture
//! classified short/long and matched against configured patterns.

use super::classifier::Edge;
use crate::actions::ActionSpec;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Short,
    Long,
}

impl Symbol {
    fn render(seq: &[Symbol]) -> String {
        seq.iter()
            .map(|s| match s {
                Symbol::Short => 'S',
                Symbol::Long => 'L',
            })
            .collect()
    }

    pub fn parse_pattern(s: &str) -> Option<Vec<Symbol>> {
        s.chars()
            .map(|c| match c {
                'S' => Some(Symbol::Short),
                'L' => Some(Symbol::Long),
                _ => None,
            })
            .collect()
    }
}

/// Decoder for one source gesture. Owns its own timers, independent of the
/// gesture's trigger machine — a morse source gesture never reaches ordinary
/// discrete triggering.
#[derive(Debug)]
pub struct MorseDecoder {
    gesture: String,
    long_ms: u64,
    gap_ms: u64,
    end_ms: u64,
    patterns: Vec<(Vec<Symbol>, ActionSpec)>,
    hold_since: Option<u64>,
    buf: Vec<Symbol>,
    last_symbol_ms: u64,
}

impl MorseDecoder {
    pub fn new(
        gesture: String,
        long_ms: u64,
        gap_ms: u64,
        end_ms: u64,
        patterns: Vec<(Vec<Symbol>, ActionSpec)>,
    ) -> Self {
        Self {
            gesture,
            long_ms,
            gap_ms,
            end_ms,
            patterns,
            hold_since: None,
            buf: Vec::new(),
            last_symbol_ms: 0,
        }
    }

    pub fn gesture(&self) -> &str {
        &self.gesture
    }

    /// Feed an activation edge of the source gesture. A new hold starting
    /// after a gap longer than gap_ms resolves the pending sequence first.
    pub fn on_edge(&mut self, edge: Edge, now: u64) -> Option<(String, ActionSpec)> {
        match edge {
            Edge::Activated => {
                let resolved = if !self.buf.is_empty()
                    && now.saturating_sub(self.last_symbol_ms) > self.gap_ms
                {
                    self.resolve()
                } else {
                    None
                };
                self.hold_since = Some(now);
                resolved
            }
            Edge::Deactivated => {
                if let Some(since) = self.hold_since.take() {
                    let held = now.saturating_sub(since);
                    self.buf.push(if held >= self.long_ms {
                        Symbol::Long
                    } else {
                        Symbol::Short
                    });
                    self.last_symbol_ms = now;
                }
                None
            }
        }
    }

    /// Poll for end-of-sequence silence.
    pub fn tick(&mut self, now: u64) -> Option<(String, ActionSpec)> {
        if self.hold_since.is_none()
            && !self.buf.is_empty()
            && now.saturating_sub(self.last_symbol_ms) > self.end_ms
        {
            return self.resolve();
        }
        None
    }

    fn resolve(&mut self) -> Option<(String, ActionSpec)> {
        let seq = std::mem::take(&mut self.buf);
        let rendered = Symbol::render(&seq);
        match self.patterns.iter().find(|(p, _)| *p == seq) {
            Some((_, action)) => Some((rendered, action.clone())),
            None => {
                debug!("morse '{}': no pattern for {rendered}, discarded", self.gesture);
                None
            }
        }
    }
}
