//! The gesture trigger engine: one evaluation pass per metric frame.
//!
//! All per-gesture state lives in an indexed table rebuilt on profile swap;
//! a frame either runs entirely under the old profile or the new one.

pub mod chain;
pub mod classifier;
pub mod conditioner;
pub mod dispatch;
pub mod morse;
pub mod trigger;

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::actions::{ActionSpec, PadAxis};
use crate::config::{ConfigError, MetricSource, Profile};
use crate::metrics::MetricFrame;
use chain::ChainMatcher;
use classifier::Classifier;
use conditioner::Conditioner;
use morse::{MorseDecoder, Symbol};
use trigger::{TriggerMachine, TriggerPulse};

#[derive(Debug, Clone)]
pub enum ActionKind {
    Fire(ActionSpec),
    Engage(ActionSpec),
    Release(ActionSpec),
    Analog { axis: PadAxis, magnitude: f32 },
}

/// A resolved action event on its way to the dispatcher. `source` names the
/// gesture, chain, or morse pattern for logging.
#[derive(Debug, Clone)]
pub struct ActionEvent {
    pub source: String,
    pub kind: ActionKind,
}

struct GestureRuntime {
    id: String,
    source: MetricSource,
    action: ActionSpec,
    conditioner: Conditioner,
    classifier: Classifier,
    trigger: TriggerMachine,
    morse_idx: Option<usize>,
}

pub struct Engine {
    gestures: Vec<GestureRuntime>,
    chains: ChainMatcher,
    morse: Vec<MorseDecoder>,
    recal_all: bool,
    recal_ids: HashSet<String>,
    last_ms: Option<u64>,
}

impl Engine {
    pub fn new(profile: &Profile) -> Result<Self, ConfigError> {
        profile.validate()?;

        let parse = |binding: &str| -> ActionSpec {
            // validate() already vetted every binding
            ActionSpec::parse(binding).unwrap_or(ActionSpec::None)
        };

        let morse: Vec<MorseDecoder> = profile
            .morse
            .iter()
            .map(|m| {
                let patterns = m
                    .patterns
                    .iter()
                    .filter_map(|(p, a)| Symbol::parse_pattern(p).map(|p| (p, parse(a))))
                    .collect();
                MorseDecoder::new(m.gesture.clone(), m.long_ms, m.gap_ms, m.end_ms, patterns)
            })
            .collect();
        let morse_by_gesture: HashMap<&str, usize> = morse
            .iter()
            .enumerate()
            .map(|(i, d)| (d.gesture(), i))
            .collect();

        let gestures = profile
            .gestures
            .iter()
            .map(|g| GestureRuntime {
                morse_idx: morse_by_gesture.get(g.id.as_str()).copied(),
                id: g.id.clone(),
                source: g.metric.clone(),
                action: parse(&g.action),
                conditioner: Conditioner::new(
                    g.smoothing.unwrap_or(profile.defaults.smoothing),
                ),
                classifier: Classifier::new(g.threshold, g.deadzone),
                trigger: TriggerMachine::new(
                    g.mode,
                    g.hold_ms.unwrap_or(profile.defaults.hold_ms),
                    g.cooldown_ms.unwrap_or(profile.defaults.cooldown_ms),
                ),
            })
            .collect();

        let chains = ChainMatcher::new(
            profile
                .chains
                .iter()
                .map(|c| (c.steps.clone(), c.timeout_ms, parse(&c.action)))
                .collect(),
        );

        Ok(Self {
            gestures,
            chains,
            morse,
            recal_all: true, // first frame establishes every baseline
            recal_ids: HashSet::new(),
            last_ms: None,
        })
    }

    /// Atomic profile swap between frames. In-flight chain/morse state is
    /// discarded; release events for engaged toggles are returned so the
    /// dispatcher can let go of held keys first.
    pub fn swap_profile(&mut self, profile: &Profile) -> Result<Vec<ActionEvent>, ConfigError> {
        let mut fresh = Engine::new(profile)?;
        fresh.last_ms = self.last_ms;
        let releases = self.release_all();
        *self = fresh;
        info!("engine: profile swapped ({} gestures)", self.gestures.len());
        Ok(releases)
    }

    /// Release events for everything currently toggled on.
    pub fn release_all(&mut self) -> Vec<ActionEvent> {
        let mut out = Vec::new();
        for g in &mut self.gestures {
            if g.trigger.disengage().is_some() {
                out.push(ActionEvent {
                    source: g.id.clone(),
                    kind: ActionKind::Release(g.action.clone()),
                });
            }
        }
        out
    }

    /// Schedule a baseline reset, applied from the next incoming frame.
    pub fn recalibrate(&mut self, gesture: Option<&str>) {
        match gesture {
            None => {
                self.recal_all = true;
                info!("engine: global recalibration scheduled");
            }
            Some(id) => {
                self.recal_ids.insert(id.to_string());
                info!("engine: recalibration scheduled for '{id}'");
            }
        }
    }

    pub fn gesture_ids(&self) -> impl Iterator<Item = &str> {
        self.gestures.iter().map(|g| g.id.as_str())
    }

    /// One evaluation pass. Returns the frame's resolved action events in
    /// deterministic (profile) order.
    pub fn process_frame(&mut self, frame: &MetricFrame) -> Vec<ActionEvent> {
        let now = frame.timestamp_ms;
        if let Some(last) = self.last_ms {
            if now < last {
                warn!("engine: dropped non-monotonic frame ({now} < {last})");
                return Vec::new();
            }
        }
        self.last_ms = Some(now);

        let recal_all = std::mem::take(&mut self.recal_all);
        let recal_ids = std::mem::take(&mut self.recal_ids);

        self.chains.tick(now);

        let mut out = Vec::new();
        for i in 0..self.gestures.len() {
            let g = &mut self.gestures[i];

            let raw = resolve_source(&g.source, frame);
            let (edge, magnitude) = match raw {
                Some(raw) => {
                    if recal_all || recal_ids.contains(&g.id) {
                        g.conditioner.recalibrate(raw);
                    }
                    let value = g.conditioner.update(raw);
                    (g.classifier.update(value), Some(g.classifier.magnitude(value)))
                }
                // metric missing from this frame: no change, timers still run
                None => (None, None),
            };

            if let Some(mi) = g.morse_idx {
                if let Some(e) = edge {
                    if let Some((pattern, action)) = self.morse[mi].on_edge(e, now) {
                        let source = format!("morse:{}:{pattern}", g.id);
                        debug!("{source} resolved");
                        out.push(ActionEvent {
                            source,
                            kind: ActionKind::Fire(action),
                        });
                    }
                }
                continue;
            }

            let Some(pulse) = g.trigger.update(now, edge, magnitude) else {
                continue;
            };
            match pulse {
                TriggerPulse::Analog(magnitude) => {
                    if let ActionSpec::PadAxis { axis } = g.action {
                        out.push(ActionEvent {
                            source: g.id.clone(),
                            kind: ActionKind::Analog { axis, magnitude },
                        });
                    }
                }
                TriggerPulse::Fired | TriggerPulse::Engaged | TriggerPulse::Released => {
                    let id = g.id.clone();
                    let action = g.action.clone();
                    let outcome = self.chains.on_trigger(&id, now);
                    if !outcome.consumed {
                        let kind = match pulse {
                            TriggerPulse::Engaged => ActionKind::Engage(action),
                            TriggerPulse::Released => ActionKind::Release(action),
                            _ => ActionKind::Fire(action),
                        };
                        out.push(ActionEvent { source: id, kind });
                    } else {
                        debug!("'{id}' consumed by chain matching");
                    }
                    for (label, action) in outcome.completed {
                        out.push(ActionEvent {
                            source: format!("chain:{label}"),
                            kind: ActionKind::Fire(action),
                        });
                    }
                }
            }
        }

        for d in &mut self.morse {
            if let Some((pattern, action)) = d.tick(now) {
                let source = format!("morse:{}:{pattern}", d.gesture());
                debug!("{source} resolved");
                out.push(ActionEvent {
                    source,
                    kind: ActionKind::Fire(action),
                });
            }
        }

        out
    }
}

/// Single metric, or a derived virtual metric combining two sources (min of
/// both, so both must be raised). Missing inputs mean "no value this frame".
fn resolve_source(source: &MetricSource, frame: &MetricFrame) -> Option<f32> {
    match source {
        MetricSource::Single(m) => frame.get(m),
        MetricSource::Combined([a, b]) => Some(frame.get(a)?.min(frame.get(b)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(body: &str) -> Profile {
        toml::from_str(body).expect("profile parses")
    }

    fn frame(t: u64, pairs: &[(&str, f32)]) -> MetricFrame {
        let mut f = MetricFrame::new(t);
        for (k, v) in pairs {
            f = f.with(k, *v);
        }
        f
    }

    fn fired_sources(events: &[ActionEvent]) -> Vec<String> {
        events.iter().map(|e| e.source.clone()).collect()
    }

    const BLINK_HOLD: &str = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 1.0
        hold_ms = 300
        cooldown_ms = 500

        [[gesture]]
        id = "blink"
        metric = "blink"
        threshold = 0.5
        deadzone = 0.1
        mode = "hold"
        action = "mouse:left"
    "#;

    #[test]
    fn first_frame_sets_baseline_without_firing() {
        let mut e = Engine::new(&profile(BLINK_HOLD)).unwrap();
        // an already-high metric on the very first frame becomes the baseline
        let ev = e.process_frame(&frame(0, &[("blink", 0.9)]));
        assert!(ev.is_empty());
        let ev = e.process_frame(&frame(33, &[("blink", 0.9)]));
        assert!(ev.is_empty());
    }

    #[test]
    fn hold_scenario_fires_once_then_honors_cooldown() {
        let mut e = Engine::new(&profile(BLINK_HOLD)).unwrap();
        e.process_frame(&frame(0, &[("blink", 0.0)]));

        let mut fires = vec![];
        // held 0.9 from t=100 to t=500, released at 510, re-held from 520
        for t in (100..=2000).step_by(10) {
            let v = if t == 510 { 0.0 } else { 0.9 };
            for ev in e.process_frame(&frame(t, &[("blink", v)])) {
                if matches!(ev.kind, ActionKind::Fire(_)) {
                    fires.push(t);
                }
            }
        }
        // armed at 100, fired at 400; re-armed at 520, matured at 820 but
        // gated until 400+500=900
        assert_eq!(fires[0], 400);
        assert_eq!(fires[1], 900);
        for w in fires.windows(2) {
            assert!(w[1] - w[0] >= 500);
        }
    }

    #[test]
    fn metric_gap_is_no_change() {
        let mut e = Engine::new(&profile(BLINK_HOLD)).unwrap();
        e.process_frame(&frame(0, &[("blink", 0.0)]));
        e.process_frame(&frame(100, &[("blink", 0.9)]));
        // frames missing the metric do not deactivate; the hold matures
        assert!(e.process_frame(&frame(200, &[])).is_empty());
        let ev = e.process_frame(&frame(400, &[]));
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].source, "blink");
    }

    #[test]
    fn non_monotonic_frames_are_dropped() {
        let mut e = Engine::new(&profile(BLINK_HOLD)).unwrap();
        e.process_frame(&frame(1000, &[("blink", 0.0)]));
        assert!(e.process_frame(&frame(500, &[("blink", 0.9)])).is_empty());
        // and the stale frame left no trace
        assert!(e.process_frame(&frame(1100, &[("blink", 0.0)])).is_empty());
    }

    const CHAIN_PROFILE: &str = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 1.0
        hold_ms = 0
        cooldown_ms = 100

        [[gesture]]
        id = "wink_left"
        metric = "wink_left"
        threshold = 0.5
        mode = "single"
        action = "key:A"

        [[gesture]]
        id = "wink_right"
        metric = "wink_right"
        threshold = 0.5
        mode = "single"
        action = "key:B"

        [[chain]]
        steps = ["wink_left", "wink_right"]
        timeout_ms = 1000
        action = "key:Z"
    "#;

    fn pulse(e: &mut Engine, t: u64, metric: &str) -> Vec<ActionEvent> {
        let mut all = e.process_frame(&frame(t, &[(metric, 0.9)]));
        all.extend(e.process_frame(&frame(t + 10, &[(metric, 0.0)])));
        all
    }

    #[test]
    fn chain_completion_suppresses_member_actions() {
        let mut e = Engine::new(&profile(CHAIN_PROFILE)).unwrap();
        e.process_frame(&frame(0, &[("wink_left", 0.0), ("wink_right", 0.0)]));

        let ev = pulse(&mut e, 100, "wink_left");
        assert!(ev.is_empty(), "consumed step must be suppressed: {ev:?}");
        let ev = pulse(&mut e, 400, "wink_right");
        assert_eq!(fired_sources(&ev), vec!["chain:wink_left>wink_right"]);
    }

    #[test]
    fn chain_timeout_forwards_the_late_step() {
        let mut e = Engine::new(&profile(CHAIN_PROFILE)).unwrap();
        e.process_frame(&frame(0, &[("wink_left", 0.0), ("wink_right", 0.0)]));

        assert!(pulse(&mut e, 100, "wink_left").is_empty());
        // second step arrives beyond timeout_ms: pointer reset, so the
        // gesture's own action is forwarded (nothing was waiting on it)
        let ev = pulse(&mut e, 2000, "wink_right");
        assert_eq!(fired_sources(&ev), vec!["wink_right"]);
    }

    #[test]
    fn chain_is_order_sensitive() {
        let mut e = Engine::new(&profile(CHAIN_PROFILE)).unwrap();
        e.process_frame(&frame(0, &[("wink_left", 0.0), ("wink_right", 0.0)]));

        let ev = pulse(&mut e, 100, "wink_right");
        assert_eq!(fired_sources(&ev), vec!["wink_right"]);
        let ev = pulse(&mut e, 400, "wink_left");
        assert!(ev.is_empty());
        let ev = pulse(&mut e, 700, "wink_right");
        assert_eq!(fired_sources(&ev), vec!["chain:wink_left>wink_right"]);
    }

    const MORSE_PROFILE: &str = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 1.0
        hold_ms = 0
        cooldown_ms = 0

        [[gesture]]
        id = "brow"
        metric = "brow"
        threshold = 0.5
        mode = "single"
        action = "key:A"

        [[morse]]
        gesture = "brow"
        long_ms = 350
        gap_ms = 700
        end_ms = 1200
        [morse.patterns]
        SSL = "key:ENTER"
    "#;

    #[test]
    fn morse_source_never_fires_directly() {
        let mut e = Engine::new(&profile(MORSE_PROFILE)).unwrap();
        e.process_frame(&frame(0, &[("brow", 0.0)]));
        let ev = pulse(&mut e, 100, "brow");
        assert!(ev.is_empty(), "morse source must not reach its trigger: {ev:?}");
    }

    #[test]
    fn morse_sequence_resolves_to_mapped_action() {
        let mut e = Engine::new(&profile(MORSE_PROFILE)).unwrap();
        e.process_frame(&frame(0, &[("brow", 0.0)]));

        let mut events = vec![];
        // S (100ms), S (150ms), L (450ms), then silence
        let holds = [(100u64, 200u64), (400, 550), (800, 1250)];
        let mut t = 50;
        while t <= 3000 {
            let held = holds.iter().any(|(a, b)| t >= *a && t < *b);
            let v = if held { 0.9 } else { 0.0 };
            events.extend(e.process_frame(&frame(t, &[("brow", v)])));
            t += 50;
        }
        assert_eq!(fired_sources(&events), vec!["morse:brow:SSL"]);
    }

    #[test]
    fn swap_discards_chain_state_and_releases_toggles() {
        let toggled = r#"
            [meta]
            name = "t"

            [defaults]
            smoothing = 1.0
            hold_ms = 0
            cooldown_ms = 100

            [[gesture]]
            id = "smile"
            metric = "smile"
            threshold = 0.5
            mode = "toggle"
            action = "key:W"
        "#;
        let mut e = Engine::new(&profile(toggled)).unwrap();
        e.process_frame(&frame(0, &[("smile", 0.0)]));
        let ev = e.process_frame(&frame(100, &[("smile", 0.9)]));
        assert!(matches!(ev[0].kind, ActionKind::Engage(_)));

        let releases = e.swap_profile(&profile(CHAIN_PROFILE)).unwrap();
        assert_eq!(releases.len(), 1);
        assert!(matches!(releases[0].kind, ActionKind::Release(_)));
        // new profile runs from scratch
        e.process_frame(&frame(200, &[("wink_left", 0.0), ("wink_right", 0.0)]));
        assert!(pulse(&mut e, 300, "wink_left").is_empty());
    }

    #[test]
    fn rejected_swap_keeps_active_profile() {
        let mut e = Engine::new(&profile(CHAIN_PROFILE)).unwrap();
        e.process_frame(&frame(0, &[("wink_left", 0.0), ("wink_right", 0.0)]));

        let mut bad = profile(CHAIN_PROFILE);
        bad.chains[0].steps[1] = "eyebrow_raise_x".into();
        assert!(e.swap_profile(&bad).is_err());

        // old profile still live and matching
        assert!(pulse(&mut e, 100, "wink_left").is_empty());
        let ev = pulse(&mut e, 400, "wink_right");
        assert_eq!(fired_sources(&ev), vec!["chain:wink_left>wink_right"]);
    }

    #[test]
    fn recalibration_uses_next_frame_as_zero() {
        let mut e = Engine::new(&profile(BLINK_HOLD)).unwrap();
        e.process_frame(&frame(0, &[("blink", 0.0)]));
        // drifted resting level would read as activation...
        e.recalibrate(Some("blink"));
        // ...but the next frame re-seeds the baseline
        assert!(e.process_frame(&frame(100, &[("blink", 0.8)])).is_empty());
        assert!(e.process_frame(&frame(500, &[("blink", 0.8)])).is_empty());
    }

    #[test]
    fn analog_updates_flow_through() {
        let analog = r#"
            [meta]
            name = "t"

            [defaults]
            smoothing = 1.0

            [[gesture]]
            id = "mouth_open"
            metric = "mouth_open"
            threshold = 0.2
            mode = "analog"
            action = "axis:y"
        "#;
        let mut e = Engine::new(&profile(analog)).unwrap();
        e.process_frame(&frame(0, &[("mouth_open", 0.0)]));
        let ev = e.process_frame(&frame(33, &[("mouth_open", 0.6)]));
        assert_eq!(ev.len(), 1);
        let ActionKind::Analog { magnitude, .. } = ev[0].kind else {
            panic!("expected analog update");
        };
        assert!((magnitude - 0.5).abs() < 1e-6);
        // release forwards zero
        let ev = e.process_frame(&frame(66, &[("mouth_open", 0.0)]));
        let ActionKind::Analog { magnitude, .. } = ev[0].kind else {
            panic!("expected analog zero");
        };
        assert_eq!(magnitude, 0.0);
    }

    #[test]
    fn combined_metric_requires_both_sources() {
        let combined = r#"
            [meta]
            name = "t"

            [defaults]
            smoothing = 1.0
            hold_ms = 0
            cooldown_ms = 100

            [[gesture]]
            id = "eyebrow_raise"
            metric = ["eyebrow_raise_left", "eyebrow_raise_right"]
            threshold = 0.5
            mode = "single"
            action = "key:E"
        "#;
        let mut e = Engine::new(&profile(combined)).unwrap();
        e.process_frame(&frame(
            0,
            &[("eyebrow_raise_left", 0.0), ("eyebrow_raise_right", 0.0)],
        ));
        // only one side raised: min stays low
        let ev = e.process_frame(&frame(
            100,
            &[("eyebrow_raise_left", 0.9), ("eyebrow_raise_right", 0.1)],
        ));
        assert!(ev.is_empty());
        let ev = e.process_frame(&frame(
            200,
            &[("eyebrow_raise_left", 0.9), ("eyebrow_raise_right", 0.8)],
        ));
        assert_eq!(fired_sources(&ev), vec!["eyebrow_raise"]);
    }
}
