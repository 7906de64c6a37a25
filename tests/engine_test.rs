//! End-to-end engine tests: synthetic frame streams in, sink calls out.

use anyhow::Result;
use facectl::actions::{ActionSink, MouseButton, PadAxis, PadButton};
use facectl::config::Profile;
use facectl::engine::{Engine, dispatch::Dispatcher};
use facectl::metrics::MetricFrame;

#[derive(Default)]
struct RecordingSink {
    calls: Vec<String>,
}

impl ActionSink for RecordingSink {
    fn key_tap(&mut self, chord: &str) -> Result<()> {
        self.calls.push(format!("tap {chord}"));
        Ok(())
    }
    fn key_down(&mut self, chord: &str) -> Result<()> {
        self.calls.push(format!("down {chord}"));
        Ok(())
    }
    fn key_up(&mut self, chord: &str) -> Result<()> {
        self.calls.push(format!("up {chord}"));
        Ok(())
    }
    fn mouse_click(&mut self, button: MouseButton) -> Result<()> {
        self.calls.push(format!("click {button:?}"));
        Ok(())
    }
    fn mouse_double_click(&mut self) -> Result<()> {
        self.calls.push("double".into());
        Ok(())
    }
    fn mouse_down(&mut self, button: MouseButton) -> Result<()> {
        self.calls.push(format!("mdown {button:?}"));
        Ok(())
    }
    fn mouse_up(&mut self, button: MouseButton) -> Result<()> {
        self.calls.push(format!("mup {button:?}"));
        Ok(())
    }
    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        self.calls.push(format!("scroll {steps}"));
        Ok(())
    }
    fn pad_button(&mut self, button: PadButton, pressed: bool) -> Result<()> {
        self.calls.push(format!("pad {button:?} {pressed}"));
        Ok(())
    }
    fn pad_axis(&mut self, axis: PadAxis, magnitude: f32) -> Result<()> {
        self.calls.push(format!("axis {axis:?} {magnitude:.2}"));
        Ok(())
    }
    fn run_command(&mut self, cmd: &str) -> Result<()> {
        self.calls.push(format!("cmd {cmd}"));
        Ok(())
    }
    fn sleep(&mut self, _ms: u64) {}
}

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

/// Run a stream of (t, metric values) through engine + dispatcher.
fn drive(
    engine: &mut Engine,
    dispatcher: &mut Dispatcher<RecordingSink>,
    stream: &[(u64, &[(&str, f32)])],
) {
    for (t, pairs) in stream {
        let events = engine.process_frame(&frame(*t, pairs));
        dispatcher.dispatch(&events);
    }
}

#[test]
fn bundled_default_profile_is_valid() {
    let p: Profile = toml::from_str(include_str!("../profiles/default.toml")).unwrap();
    p.validate().unwrap();
    Engine::new(&p).unwrap();
}

#[test]
fn noisy_signal_clicks_once() {
    let body = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 0.5
        hold_ms = 0
        cooldown_ms = 400

        [[gesture]]
        id = "smile"
        metric = "smile"
        threshold = 0.5
        deadzone = 0.15
        mode = "single"
        action = "mouse:left"
    "#;
    let mut engine = Engine::new(&profile(body)).unwrap();
    let mut d = Dispatcher::new(RecordingSink::default());

    // ramp up with jitter around the threshold, then back down
    let values = [
        0.0, 0.1, 0.3, 0.55, 0.48, 0.62, 0.5, 0.7, 0.75, 0.7, 0.72, 0.5, 0.3, 0.1, 0.0,
    ];
    let stream: Vec<(u64, Vec<(&str, f32)>)> = values
        .iter()
        .enumerate()
        .map(|(i, v)| (i as u64 * 33, vec![("smile", *v)]))
        .collect();
    for (t, pairs) in &stream {
        let events = engine.process_frame(&frame(*t, pairs));
        d.dispatch(&events);
    }
    assert_eq!(d.sink_mut().calls, vec!["click Left"]);
}

#[test]
fn hold_fire_timing_and_cooldown_scenario() {
    let body = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 0.0
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
    let mut engine = Engine::new(&profile(body)).unwrap();
    let mut d = Dispatcher::new(RecordingSink::default());

    // baseline frame, then a 400ms activation
    drive(&mut engine, &mut d, &[(0, &[("blink", 0.0)])]);
    let mut clicks_at = vec![];
    for t in (10..=2000u64).step_by(10) {
        let v = if (100..500).contains(&t) || t >= 510 { 0.9 } else { 0.0 };
        let events = engine.process_frame(&frame(t, &[("blink", v)]));
        let before = d.sink_mut().calls.len();
        d.dispatch(&events);
        if d.sink_mut().calls.len() > before {
            clicks_at.push(t);
        }
    }
    // fire at 100+300=400; re-activation at 510 held until the gate opens
    assert_eq!(clicks_at[0], 400);
    assert_eq!(clicks_at[1], 900);
    for w in clicks_at.windows(2) {
        assert!(w[1] - w[0] >= 500);
    }
}

#[test]
fn chain_then_morse_full_session() {
    let body = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 0.0
        hold_ms = 0
        cooldown_ms = 100

        [[gesture]]
        id = "wink_left"
        metric = "wink_left"
        threshold = 0.5
        mode = "single"
        action = "mouse:right"

        [[gesture]]
        id = "wink_right"
        metric = "wink_right"
        threshold = 0.5
        mode = "single"
        action = "mouse:middle"

        [[gesture]]
        id = "smirk_left"
        metric = "smirk_left"
        threshold = 0.5
        mode = "single"
        action = "none"

        [[chain]]
        steps = ["wink_left", "wink_right"]
        timeout_ms = 1000
        action = "key:CTRL+Z"

        [[morse]]
        gesture = "smirk_left"
        long_ms = 400
        gap_ms = 800
        end_ms = 1400
        [morse.patterns]
        SL = "key:CTRL+V"
    "#;
    let mut engine = Engine::new(&profile(body)).unwrap();
    let mut d = Dispatcher::new(RecordingSink::default());

    let zero: &[(&str, f32)] = &[("wink_left", 0.0), ("wink_right", 0.0), ("smirk_left", 0.0)];
    drive(&mut engine, &mut d, &[(0, zero)]);

    // chain: left wink then right wink inside the window
    drive(
        &mut engine,
        &mut d,
        &[
            (100, &[("wink_left", 0.9)]),
            (150, &[("wink_left", 0.0)]),
            (400, &[("wink_right", 0.9)]),
            (450, &[("wink_right", 0.0)]),
        ],
    );
    assert_eq!(d.sink_mut().calls, vec!["tap CTRL+Z"]);
    d.sink_mut().calls.clear();

    // morse on the smirk: short (150ms) then long (500ms), then silence
    drive(
        &mut engine,
        &mut d,
        &[
            (1000, &[("smirk_left", 0.9)]),
            (1150, &[("smirk_left", 0.0)]),
            (1400, &[("smirk_left", 0.9)]),
            (1900, &[("smirk_left", 0.0)]),
            (2500, &[("smirk_left", 0.0)]),
            (3400, &[("smirk_left", 0.0)]),
        ],
    );
    assert_eq!(d.sink_mut().calls, vec!["tap CTRL+V"]);
}

#[test]
fn toggle_drives_sustained_axis_free_key_hold() {
    let body = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 0.0
        hold_ms = 0
        cooldown_ms = 200

        [[gesture]]
        id = "brow_furrow"
        metric = "brow_furrow"
        threshold = 0.5
        deadzone = 0.1
        mode = "toggle"
        action = "key:W"
    "#;
    let mut engine = Engine::new(&profile(body)).unwrap();
    let mut d = Dispatcher::new(RecordingSink::default());

    drive(
        &mut engine,
        &mut d,
        &[
            (0, &[("brow_furrow", 0.0)]),
            (100, &[("brow_furrow", 0.9)]), // toggle on
            (200, &[("brow_furrow", 0.0)]),
            (600, &[("brow_furrow", 0.9)]), // toggle off
            (700, &[("brow_furrow", 0.0)]),
        ],
    );
    assert_eq!(d.sink_mut().calls, vec!["down W", "up W"]);
}

#[test]
fn analog_gesture_streams_axis_values() {
    let body = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 0.0

        [[gesture]]
        id = "mouth_open"
        metric = "mouth_open"
        threshold = 0.2
        mode = "analog"
        action = "axis:y"
    "#;
    let mut engine = Engine::new(&profile(body)).unwrap();
    let mut d = Dispatcher::new(RecordingSink::default());

    drive(
        &mut engine,
        &mut d,
        &[
            (0, &[("mouth_open", 0.0)]),
            (33, &[("mouth_open", 0.6)]),
            (66, &[("mouth_open", 0.6)]),
            (99, &[("mouth_open", 1.0)]),
            (132, &[("mouth_open", 0.0)]),
        ],
    );
    assert_eq!(
        d.sink_mut().calls,
        vec!["axis Y 0.50", "axis Y 1.00", "axis Y 0.00"]
    );
}

#[test]
fn shutdown_releases_everything_held() {
    let body = r#"
        [meta]
        name = "t"

        [defaults]
        smoothing = 0.0
        hold_ms = 0
        cooldown_ms = 100

        [[gesture]]
        id = "brow_furrow"
        metric = "brow_furrow"
        threshold = 0.5
        mode = "toggle"
        action = "key:W"
    "#;
    let mut engine = Engine::new(&profile(body)).unwrap();
    let mut d = Dispatcher::new(RecordingSink::default());

    drive(
        &mut engine,
        &mut d,
        &[(0, &[("brow_furrow", 0.0)]), (100, &[("brow_furrow", 0.9)])],
    );
    assert_eq!(d.sink_mut().calls, vec!["down W"]);

    let releases = engine.release_all();
    d.dispatch(&releases);
    d.release_all();
    assert_eq!(d.sink_mut().calls, vec!["down W", "up W"]);
}

#[test]
fn import_with_dangling_reference_fails_wholesale() {
    let bad = r#"
        [meta]
        name = "bad"

        [[gesture]]
        id = "blink"
        metric = "blink"
        threshold = 0.5
        mode = "single"
        action = "mouse:left"

        [[chain]]
        steps = ["blink", "eyebrow_raise_x"]
        timeout_ms = 1000
        action = "key:Z"
    "#;
    let p = profile(bad);
    assert!(p.validate().is_err());
    assert!(Engine::new(&p).is_err());
}
