//! Ordered-sequence matching over the stream of discrete gesture firings.

use crate::actions::ActionSpec;

/// One configured chain plus its match pointer: the index of the next
/// expected gesture and the timestamp of the last accepted step.
#[derive(Debug, Clone)]
struct ChainState {
    steps: Vec<String>,
    timeout_ms: u64,
    action: ActionSpec,
    label: String,
    idx: usize,
    last_ms: u64,
}

#[derive(Debug, Default)]
pub struct ChainOutcome {
    /// Some chain was waiting on this gesture; its own action is suppressed.
    pub consumed: bool,
    /// Actions of chains completed by this event, with their labels.
    pub completed: Vec<(String, ActionSpec)>,
}

#[derive(Debug, Default)]
pub struct ChainMatcher {
    chains: Vec<ChainState>,
}

impl ChainMatcher {
    pub fn new(configs: Vec<(Vec<String>, u64, ActionSpec)>) -> Self {
        let chains = configs
            .into_iter()
            .map(|(steps, timeout_ms, action)| ChainState {
                label: steps.join(">"),
                steps,
                timeout_ms,
                action,
                idx: 0,
                last_ms: 0,
            })
            .collect();
        Self { chains }
    }

    /// Reset pointers whose inter-step window has expired.
    pub fn tick(&mut self, now: u64) {
        for c in &mut self.chains {
            if c.idx > 0 && now.saturating_sub(c.last_ms) > c.timeout_ms {
                c.idx = 0;
            }
        }
    }

    /// Feed one discrete firing. Pointers are independent: several chains may
    /// advance from the same event, and each completed chain emits its own
    /// action while the triggering gesture's action is suppressed only once.
    pub fn on_trigger(&mut self, gesture: &str, now: u64) -> ChainOutcome {
        let mut out = ChainOutcome::default();
        for c in &mut self.chains {
            if c.idx > 0 && now.saturating_sub(c.last_ms) > c.timeout_ms {
                c.idx = 0;
            }
            if c.steps[c.idx] == gesture {
                out.consumed = true;
                c.idx += 1;
                c.last_ms = now;
                if c.idx >= c.steps.len() {
                    c.idx = 0;
                    out.completed.push((c.label.clone(), c.action.clone()));
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
