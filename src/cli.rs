use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, process::Command};

use crate::actions::{ActionSink, MouseButton, PadAxis};
use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("facectl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => {
            let r = ipc::client_request(serde_json::json!({"op":"shutdown"}))?;
            print_response(&r);
            Ok(())
        }

        Some("status") => {
            let r = ipc::client_request(serde_json::json!({"op":"status"}))?;
            print_response(&r);
            Ok(())
        }

        Some("reload") => {
            let r = ipc::client_request(serde_json::json!({"op":"reload"}))?;
            print_response(&r);
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: facectl use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("list") => {
            let r = ipc::client_request(serde_json::json!({"op":"list"}))?;
            print_response(&r);
            Ok(())
        }

        Some("doctor") => {
            let r = ipc::client_request(serde_json::json!({"op":"doctor"}))?;
            print_response(&r);
            Ok(())
        }

        Some("recalibrate") => {
            // optional gesture id; without one, every baseline resets
            let gesture: Option<String> = pargs.free_from_str().ok();
            let req = match gesture {
                Some(g) => serde_json::json!({"op":"recalibrate","gesture":g}),
                None => serde_json::json!({"op":"recalibrate"}),
            };
            let r = ipc::client_request(req)?;
            print_response(&r);
            Ok(())
        }

        Some("emit") => {
            // usage:
            //   facectl emit click right
            //   facectl emit scroll 3
            //   facectl emit key CTRL+Z
            //   facectl emit pad a
            //   facectl emit axis y 0.5
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: facectl emit <click|scroll|key|pad|axis> ..."))?;
            let mut sink = crate::actions::UinputSink::new()?;
            match what.as_str() {
                "click" => {
                    let btn: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: facectl emit click <left|right|middle>"))?;
                    let button = match btn.as_str() {
                        "left" => MouseButton::Left,
                        "right" => MouseButton::Right,
                        "middle" => MouseButton::Middle,
                        other => return Err(anyhow!("unknown mouse button: {other}")),
                    };
                    sink.mouse_click(button)?;
                    println!("ok: clicked {btn}");
                }
                "scroll" => {
                    let steps: i32 = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: facectl emit scroll <steps>"))?;
                    sink.scroll_vertical(steps)?;
                    println!("ok: scrolled vertical {steps}");
                }
                "key" => {
                    let chord: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: facectl emit key CTRL+Z"))?;
                    sink.key_tap(&chord.to_ascii_uppercase())?;
                    println!("ok: sent key chord {chord}");
                }
                "pad" => {
                    let name: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: facectl emit pad <button>"))?;
                    let spec = crate::actions::ActionSpec::parse(&format!("pad:{name}"))
                        .map_err(|e| anyhow!(e))?;
                    let crate::actions::ActionSpec::PadButton { button } = spec else {
                        unreachable!()
                    };
                    sink.pad_button(button, true)?;
                    sink.pad_button(button, false)?;
                    println!("ok: pressed pad {name}");
                }
                "axis" => {
                    let name: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: facectl emit axis <x|y|rx|ry> <0..1>"))?;
                    let value: f32 = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: facectl emit axis <x|y|rx|ry> <0..1>"))?;
                    let axis = match name.as_str() {
                        "x" => PadAxis::X,
                        "y" => PadAxis::Y,
                        "rx" => PadAxis::RX,
                        "ry" => PadAxis::RY,
                        other => return Err(anyhow!("unknown axis: {other}")),
                    };
                    sink.pad_axis(axis, value)?;
                    println!("ok: axis {name} = {value}");
                }
                other => return Err(anyhow!("unknown emit kind: {other}")),
            }
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!(
        r#"facectl — hands-free gesture control daemon

USAGE:
  facectl help [command]                  Show general or command-specific help
  facectl start                           Start the daemon
  facectl stop                            Stop the daemon
  facectl status                          Show daemon state
  facectl reload                          Reload active profile
  facectl use <name>                      Switch active profile
  facectl list                            List profiles
  facectl doctor                          Diagnose permissions/devices
  facectl recalibrate [gesture]           Reset gesture baselines
  facectl emit click <left|right|middle>  Emit a mouse click
  facectl emit scroll <steps>             Emit vertical scroll (+/- steps)
  facectl emit key CTRL+Z                 Emit a key or chord
  facectl emit pad <button>               Emit a gamepad button press
  facectl emit axis <x|y|rx|ry> <0..1>    Emit a gamepad axis value

TIPS:
  - Profiles: ~/.config/facectl/profiles
  - Active profile pointer: ~/.config/facectl/active
  - Landmark collaborator streams frames to ~/.local/run/facectl-metrics.sock
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: facectl start\nStarts the background daemon."),
        "stop" => println!("usage: facectl stop\nStops the running daemon and releases held keys."),
        "status" => println!(
            "usage: facectl status\nShows active profile, socket paths, configured gesture/chain counts."
        ),
        "reload" => println!(
            "usage: facectl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: facectl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => {
            println!("usage: facectl list\nLists available profiles.")
        }
        "doctor" => println!(
            "usage: facectl doctor\nChecks uinput permissions and reports socket locations."
        ),
        "recalibrate" => println!(
            "usage: facectl recalibrate [gesture]\nResets smoothing baselines to the next frame; all gestures when none given."
        ),
        "emit" => println!(
            "usage:\n  facectl emit click <left|right|middle>\n  facectl emit scroll <steps>\n  facectl emit key CTRL+Z\n  facectl emit pad <button>\n  facectl emit axis <x|y|rx|ry> <0..1>"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
