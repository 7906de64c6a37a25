//! Hand-off from the engine to the injection sink. Fire-and-forget: sink
//! failures are logged and dropped so engine state keeps its cooldown/hold
//! semantics regardless of delivery.

use anyhow::Result;
use log::{error, info};

use super::{ActionEvent, ActionKind};
use crate::actions::{ActionSink, ActionSpec, MacroMouse, MacroStep};

pub struct Dispatcher<S: ActionSink> {
    sink: S,
    /// Holdable specs currently engaged by toggle gestures.
    engaged: Vec<ActionSpec>,
    dragging: bool,
}

impl<S: ActionSink> Dispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            engaged: Vec::new(),
            dragging: false,
        }
    }

    pub fn dispatch(&mut self, events: &[ActionEvent]) {
        for ev in events {
            if let Err(e) = self.deliver(ev) {
                error!("injection failed for {}: {e}", ev.source);
            }
        }
    }

    fn deliver(&mut self, ev: &ActionEvent) -> Result<()> {
        match &ev.kind {
            ActionKind::Fire(spec) => self.fire(spec),
            ActionKind::Engage(spec) => {
                if spec.holdable() {
                    self.down(spec)?;
                    self.engaged.push(spec.clone());
                    Ok(())
                } else {
                    // non-holdable toggles fire once on engage
                    self.fire(spec)
                }
            }
            ActionKind::Release(spec) => {
                if spec.holdable() {
                    self.up(spec)?;
                    self.engaged.retain(|s| s != spec);
                }
                Ok(())
            }
            ActionKind::Analog { axis, magnitude } => self.sink.pad_axis(*axis, *magnitude),
        }
    }

    fn fire(&mut self, spec: &ActionSpec) -> Result<()> {
        match spec {
            ActionSpec::None => Ok(()),
            ActionSpec::Key { chord } => self.sink.key_tap(chord),
            ActionSpec::MouseClick { button } => self.sink.mouse_click(*button),
            ActionSpec::DoubleClick => self.sink.mouse_double_click(),
            ActionSpec::Scroll { steps } => self.sink.scroll_vertical(*steps),
            ActionSpec::DragToggle => {
                if self.dragging {
                    self.sink.mouse_up(crate::actions::MouseButton::Left)?;
                } else {
                    self.sink.mouse_down(crate::actions::MouseButton::Left)?;
                }
                self.dragging = !self.dragging;
                Ok(())
            }
            ActionSpec::PadButton { button } => {
                self.sink.pad_button(*button, true)?;
                self.sink.pad_button(*button, false)
            }
            ActionSpec::PadAxis { .. } => Ok(()),
            ActionSpec::Macro { steps } => self.run_macro(steps),
            ActionSpec::Command { cmd } => self.sink.run_command(cmd),
        }
    }

    fn down(&mut self, spec: &ActionSpec) -> Result<()> {
        match spec {
            ActionSpec::Key { chord } => self.sink.key_down(chord),
            ActionSpec::MouseClick { button } => self.sink.mouse_down(*button),
            ActionSpec::PadButton { button } => self.sink.pad_button(*button, true),
            _ => Ok(()),
        }
    }

    fn up(&mut self, spec: &ActionSpec) -> Result<()> {
        match spec {
            ActionSpec::Key { chord } => self.sink.key_up(chord),
            ActionSpec::MouseClick { button } => self.sink.mouse_up(*button),
            ActionSpec::PadButton { button } => self.sink.pad_button(*button, false),
            _ => Ok(()),
        }
    }

    fn run_macro(&mut self, steps: &[MacroStep]) -> Result<()> {
        let mut prev_was_input = false;
        for step in steps {
            let is_input = !matches!(step, MacroStep::Delay(_));
            // breathing room between consecutive key/mouse steps
            if prev_was_input && is_input {
                self.sink.sleep(50);
            }
            match step {
                MacroStep::Key(chord) => self.sink.key_tap(chord)?,
                MacroStep::Hold { chord, ms } => {
                    self.sink.key_down(chord)?;
                    self.sink.sleep(*ms);
                    self.sink.key_up(chord)?;
                }
                MacroStep::Mouse(m) => match m {
                    MacroMouse::Click(b) => self.sink.mouse_click(*b)?,
                    MacroMouse::DoubleClick => self.sink.mouse_double_click()?,
                    MacroMouse::ScrollUp => self.sink.scroll_vertical(3)?,
                    MacroMouse::ScrollDown => self.sink.scroll_vertical(-3)?,
                },
                MacroStep::Delay(ms) => self.sink.sleep(*ms),
            }
            prev_was_input = is_input;
        }
        Ok(())
    }

    /// Release everything still engaged (shutdown, profile swap safety net).
    pub fn release_all(&mut self) {
        for spec in std::mem::take(&mut self.engaged) {
            if let Err(e) = self.up(&spec) {
                error!("release failed for {spec}: {e}");
            }
        }
        if self.dragging {
            self.dragging = false;
            if let Err(e) = self.sink.mouse_up(crate::actions::MouseButton::Left) {
                error!("drag release failed: {e}");
            } else {
                info!("released in-flight drag");
            }
        }
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
