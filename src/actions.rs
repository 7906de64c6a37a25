//! Action bindings and the uinput injection sink.
//!
//! Bindings are strings in profile files ("key:CTRL+Z", "mouse:left",
//! "macro:key:W;delay:100;mouse:left") parsed into ActionSpec once at
//! profile load.

use anyhow::{Result, anyhow};
use log::{info, warn};
use std::{fmt, thread, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "middle" => Some(Self::Middle),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadButton {
    A,
    B,
    X,
    Y,
    TL,
    TR,
    TL2,
    TR2,
    Select,
    Start,
    Mode,
    ThumbL,
    ThumbR,
}

impl PadButton {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "a" => Self::A,
            "b" => Self::B,
            "x" => Self::X,
            "y" => Self::Y,
            "tl" => Self::TL,
            "tr" => Self::TR,
            "tl2" => Self::TL2,
            "tr2" => Self::TR2,
            "select" => Self::Select,
            "start" => Self::Start,
            "mode" => Self::Mode,
            "thumbl" => Self::ThumbL,
            "thumbr" => Self::ThumbR,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadAxis {
    X,
    Y,
    RX,
    RY,
}

impl PadAxis {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            "rx" => Some(Self::RX),
            "ry" => Some(Self::RY),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroMouse {
    Click(MouseButton),
    DoubleClick,
    ScrollUp,
    ScrollDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacroStep {
    Key(String),
    Hold { chord: String, ms: u64 },
    Mouse(MacroMouse),
    Delay(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    None,
    Key { chord: String },
    MouseClick { button: MouseButton },
    DoubleClick,
    Scroll { steps: i32 },
    DragToggle,
    PadButton { button: PadButton },
    PadAxis { axis: PadAxis },
    Macro { steps: Vec<MacroStep> },
    Command { cmd: String },
}

impl ActionSpec {
    /// Parse a profile binding string. Errors carry a human-readable reason
    /// so profile validation can surface them.
    pub fn parse(binding: &str) -> std::result::Result<Self, String> {
        let b = binding.trim();
        if b.is_empty() || b == "none" {
            return Ok(Self::None);
        }
        if let Some(rest) = b.strip_prefix("key:") {
            let chord = rest.trim();
            if chord.is_empty() {
                return Err("empty key chord".into());
            }
            return Ok(Self::Key {
                chord: chord.to_ascii_uppercase(),
            });
        }
        if let Some(rest) = b.strip_prefix("mouse:") {
            let which = rest.trim();
            if which == "double" {
                return Ok(Self::DoubleClick);
            }
            return MouseButton::parse(which)
                .map(|button| Self::MouseClick { button })
                .ok_or_else(|| format!("unknown mouse button '{which}'"));
        }
        if let Some(rest) = b.strip_prefix("scroll:") {
            let steps: i32 = rest
                .trim()
                .trim_start_matches('+')
                .parse()
                .map_err(|_| format!("bad scroll step count '{rest}'"))?;
            if steps == 0 {
                return Err("scroll steps must be nonzero".into());
            }
            return Ok(Self::Scroll { steps });
        }
        if b == "drag:toggle" {
            return Ok(Self::DragToggle);
        }
        if let Some(rest) = b.strip_prefix("pad:") {
            return PadButton::parse(rest.trim())
                .map(|button| Self::PadButton { button })
                .ok_or_else(|| format!("unknown gamepad button '{rest}'"));
        }
        if let Some(rest) = b.strip_prefix("axis:") {
            return PadAxis::parse(rest.trim())
                .map(|axis| Self::PadAxis { axis })
                .ok_or_else(|| format!("unknown gamepad axis '{rest}'"));
        }
        if let Some(rest) = b.strip_prefix("macro:") {
            let steps = parse_macro(rest)?;
            if steps.is_empty() {
                return Err("empty macro".into());
            }
            return Ok(Self::Macro { steps });
        }
        if let Some(rest) = b.strip_prefix("cmd:") {
            let cmd = rest.trim();
            if cmd.is_empty() {
                return Err("empty command".into());
            }
            return Ok(Self::Command {
                cmd: cmd.to_string(),
            });
        }
        Err(format!("unknown binding '{b}'"))
    }

    /// Whether the action has a meaningful down/up pair (toggle engage/release).
    pub fn holdable(&self) -> bool {
        matches!(
            self,
            Self::Key { .. } | Self::MouseClick { .. } | Self::PadButton { .. }
        )
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Key { chord } => write!(f, "key:{chord}"),
            Self::MouseClick { button } => write!(f, "mouse:{}", button.as_str()),
            Self::DoubleClick => write!(f, "mouse:double"),
            Self::Scroll { steps } => write!(f, "scroll:{steps}"),
            Self::DragToggle => write!(f, "drag:toggle"),
            Self::PadButton { .. } => write!(f, "pad:button"),
            Self::PadAxis { .. } => write!(f, "axis"),
            Self::Macro { steps } => write!(f, "macro({} steps)", steps.len()),
            Self::Command { cmd } => write!(f, "cmd:{cmd}"),
        }
    }
}

// macro grammar: step;step;step
//   key:CHORD  hold:CHORD:MS  mouse:ACTION  delay:MS
fn parse_macro(s: &str) -> std::result::Result<Vec<MacroStep>, String> {
    let mut steps = Vec::new();
    for part in s.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(rest) = part.strip_prefix("key:") {
            if rest.trim().is_empty() {
                return Err("macro key step has no chord".into());
            }
            steps.push(MacroStep::Key(rest.trim().to_ascii_uppercase()));
        } else if let Some(rest) = part.strip_prefix("hold:") {
            let (chord, ms) = rest
                .rsplit_once(':')
                .ok_or_else(|| format!("macro hold step '{part}' needs hold:CHORD:MS"))?;
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| format!("bad hold duration in '{part}'"))?;
            steps.push(MacroStep::Hold {
                chord: chord.trim().to_ascii_uppercase(),
                ms,
            });
        } else if let Some(rest) = part.strip_prefix("mouse:") {
            let m = match rest.trim() {
                "double" => MacroMouse::DoubleClick,
                "scroll_up" => MacroMouse::ScrollUp,
                "scroll_down" => MacroMouse::ScrollDown,
                other => MacroMouse::Click(
                    MouseButton::parse(other)
                        .ok_or_else(|| format!("unknown macro mouse action '{other}'"))?,
                ),
            };
            steps.push(MacroStep::Mouse(m));
        } else if let Some(rest) = part.strip_prefix("delay:") {
            let ms: u64 = rest
                .trim()
                .parse()
                .map_err(|_| format!("bad delay in '{part}'"))?;
            steps.push(MacroStep::Delay(ms));
        } else {
            return Err(format!("unknown macro step '{part}'"));
        }
    }
    Ok(steps)
}

/// Output side of the engine. The daemon uses the uinput sink; tests record.
pub trait ActionSink {
    fn key_tap(&mut self, chord: &str) -> Result<()>;
    fn key_down(&mut self, chord: &str) -> Result<()>;
    fn key_up(&mut self, chord: &str) -> Result<()>;
    fn mouse_click(&mut self, button: MouseButton) -> Result<()>;
    fn mouse_double_click(&mut self) -> Result<()>;
    fn mouse_down(&mut self, button: MouseButton) -> Result<()>;
    fn mouse_up(&mut self, button: MouseButton) -> Result<()>;
    fn scroll_vertical(&mut self, steps: i32) -> Result<()>;
    fn pad_button(&mut self, button: PadButton, pressed: bool) -> Result<()>;
    fn pad_axis(&mut self, axis: PadAxis, magnitude: f32) -> Result<()>;
    fn run_command(&mut self, cmd: &str) -> Result<()>;

    fn sleep(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

pub struct UinputSink {
    enabled: bool,
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                enabled: true,
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self {
                enabled: true,
                linux: None,
            })
        }
    }

    pub fn noop() -> Self {
        Self {
            enabled: true,
            linux: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn set_enabled(&mut self, en: bool) {
        self.enabled = en;
    }
}

impl ActionSink for UinputSink {
    fn key_tap(&mut self, chord: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            let keys = chord_keys(chord)?;
            // press in order, release in reverse
            for k in &keys {
                dev.key_send(*k, 1)?;
            }
            dev.sync()?;
            for k in keys.iter().rev() {
                dev.key_send(*k, 0)?;
            }
            dev.sync()?;
        }
        Ok(())
    }

    fn key_down(&mut self, chord: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            for k in chord_keys(chord)? {
                dev.key_send(k, 1)?;
            }
            dev.sync()?;
        }
        Ok(())
    }

    fn key_up(&mut self, chord: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            for k in chord_keys(chord)?.iter().rev() {
                dev.key_send(*k, 0)?;
            }
            dev.sync()?;
        }
        Ok(())
    }

    fn mouse_click(&mut self, button: MouseButton) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.click(button)?;
        }
        Ok(())
    }

    fn mouse_double_click(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.click(MouseButton::Left)?;
            dev.click(MouseButton::Left)?;
        }
        Ok(())
    }

    fn mouse_down(&mut self, button: MouseButton) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.button_send(button, 1)?;
        }
        Ok(())
    }

    fn mouse_up(&mut self, button: MouseButton) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.button_send(button, 0)?;
        }
        Ok(())
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.scroll_vertical(steps)?;
        }
        Ok(())
    }

    fn pad_button(&mut self, button: PadButton, pressed: bool) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.pad_send(button, if pressed { 1 } else { 0 })?;
        }
        Ok(())
    }

    fn pad_axis(&mut self, axis: PadAxis, magnitude: f32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.axis_send(axis, magnitude)?;
        }
        Ok(())
    }

    fn run_command(&mut self, cmd: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        std::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .spawn()
            .map_err(|e| anyhow!("failed to spawn '{cmd}': {e}"))?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn chord_keys(chord: &str) -> Result<Vec<uinput::event::keyboard::Key>> {
    let mut keys = Vec::new();
    for tok in chord.split('+') {
        keys.push(map_key(tok.trim())?);
    }
    Ok(keys)
}

#[cfg(target_os = "linux")]
fn map_key(tok: &str) -> Result<uinput::event::keyboard::Key> {
    use uinput::event::keyboard::Key as K;
    let k = match tok {
        "CTRL" | "CONTROL" => K::LeftControl,
        "ALT" => K::LeftAlt,
        "SHIFT" => K::LeftShift,
        "SUPER" | "META" | "WIN" => K::LeftMeta,
        "A" => K::A,
        "B" => K::B,
        "C" => K::C,
        "D" => K::D,
        "E" => K::E,
        "F" => K::F,
        "G" => K::G,
        "H" => K::H,
        "I" => K::I,
        "J" => K::J,
        "K" => K::K,
        "L" => K::L,
        "M" => K::M,
        "N" => K::N,
        "O" => K::O,
        "P" => K::P,
        "Q" => K::Q,
        "R" => K::R,
        "S" => K::S,
        "T" => K::T,
        "U" => K::U,
        "V" => K::V,
        "W" => K::W,
        "X" => K::X,
        "Y" => K::Y,
        "Z" => K::Z,
        "0" => K::_0,
        "1" => K::_1,
        "2" => K::_2,
        "3" => K::_3,
        "4" => K::_4,
        "5" => K::_5,
        "6" => K::_6,
        "7" => K::_7,
        "8" => K::_8,
        "9" => K::_9,
        "F1" => K::F1,
        "F2" => K::F2,
        "F3" => K::F3,
        "F4" => K::F4,
        "F5" => K::F5,
        "F6" => K::F6,
        "F7" => K::F7,
        "F8" => K::F8,
        "F9" => K::F9,
        "F10" => K::F10,
        "F11" => K::F11,
        "F12" => K::F12,
        "TAB" => K::Tab,
        "ENTER" | "RETURN" => K::Enter,
        "SPACE" => K::Space,
        "ESC" | "ESCAPE" => K::Esc,
        "BACKSPACE" => K::BackSpace,
        "DELETE" => K::Delete,
        "INSERT" => K::Insert,
        "HOME" => K::Home,
        "END" => K::End,
        "PAGEUP" => K::PageUp,
        "PAGEDOWN" => K::PageDown,
        "UP" => K::Up,
        "DOWN" => K::Down,
        "LEFT" => K::Left,
        "RIGHT" => K::Right,
        "CAPSLOCK" => K::CapsLock,
        "MINUS" | "-" => K::Minus,
        "EQUAL" | "=" => K::Equal,
        "COMMA" | "," => K::Comma,
        "DOT" | "." => K::Dot,
        "SLASH" | "/" => K::Slash,
        "BACKSLASH" | "\\" => K::BackSlash,
        "SEMICOLON" | ";" => K::SemiColon,
        "APOSTROPHE" | "'" => K::Apostrophe,
        "GRAVE" | "`" => K::Grave,
        "LEFTBRACE" | "[" => K::LeftBrace,
        "RIGHTBRACE" | "]" => K::RightBrace,
        other => return Err(anyhow!("unsupported key token: {other}")),
    };
    Ok(k)
}

const AXIS_MAX: i32 = 255;

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::{Keyboard, absolute, controller};

        let dev = uinput::default()?
            .name("Facectl Virtual Input")?
            // chords are profile-defined, enable the whole keyboard
            .event(Keyboard::All)?
            // mouse buttons + wheel
            .event(controller::Mouse::Left)?
            .event(controller::Mouse::Right)?
            .event(controller::Mouse::Middle)?
            .event(uinput::event::relative::Wheel::Vertical)?
            // gamepad buttons
            .event(controller::GamePad::A)?
            .event(controller::GamePad::B)?
            .event(controller::GamePad::X)?
            .event(controller::GamePad::Y)?
            .event(controller::GamePad::TL)?
            .event(controller::GamePad::TR)?
            .event(controller::GamePad::TL2)?
            .event(controller::GamePad::TR2)?
            .event(controller::GamePad::Select)?
            .event(controller::GamePad::Start)?
            .event(controller::GamePad::Mode)?
            .event(controller::GamePad::ThumbL)?
            .event(controller::GamePad::ThumbR)?
            // analog axes
            .event(absolute::Position::X)?
            .min(0)
            .max(AXIS_MAX)
            .event(absolute::Position::Y)?
            .min(0)
            .max(AXIS_MAX)
            .event(absolute::Position::RX)?
            .min(0)
            .max(AXIS_MAX)
            .event(absolute::Position::RY)?
            .min(0)
            .max(AXIS_MAX)
            .create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn key_send(&mut self, key: uinput::event::keyboard::Key, val: i32) -> Result<()> {
        self.dev.send(key, val)?;
        Ok(())
    }

    fn button_send(&mut self, button: MouseButton, val: i32) -> Result<()> {
        use uinput::event::controller::Mouse;
        let b = match button {
            MouseButton::Left => Mouse::Left,
            MouseButton::Right => Mouse::Right,
            MouseButton::Middle => Mouse::Middle,
        };
        self.dev.send(b, val)?;
        self.sync()
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.button_send(button, 1)?;
        self.button_send(button, 0)
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }

    fn pad_send(&mut self, button: PadButton, val: i32) -> Result<()> {
        use uinput::event::controller::GamePad;
        let b = match button {
            PadButton::A => GamePad::A,
            PadButton::B => GamePad::B,
            PadButton::X => GamePad::X,
            PadButton::Y => GamePad::Y,
            PadButton::TL => GamePad::TL,
            PadButton::TR => GamePad::TR,
            PadButton::TL2 => GamePad::TL2,
            PadButton::TR2 => GamePad::TR2,
            PadButton::Select => GamePad::Select,
            PadButton::Start => GamePad::Start,
            PadButton::Mode => GamePad::Mode,
            PadButton::ThumbL => GamePad::ThumbL,
            PadButton::ThumbR => GamePad::ThumbR,
        };
        self.dev.send(b, val)?;
        self.sync()
    }

    fn axis_send(&mut self, axis: PadAxis, magnitude: f32) -> Result<()> {
        use uinput::event::absolute::Position;
        let a = match axis {
            PadAxis::X => Position::X,
            PadAxis::Y => Position::Y,
            PadAxis::RX => Position::RX,
            PadAxis::RY => Position::RY,
        };
        let v = (magnitude.clamp(0.0, 1.0) * AXIS_MAX as f32).round() as i32;
        self.dev.send(a, v)?;
        self.sync()
    }
}

#[cfg(not(target_os = "linux"))]
struct LinuxUinput;
