use anyhow::Result;
use log::{error, info, warn};
use notify::{RecursiveMode, Watcher};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::mpsc,
    thread,
    time::Duration,
};

use super::pipeline::{PipelineMsg, run_pipeline};
use super::runtime::socket_path;
use crate::config::{DaemonConfigState, Profile};

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut state = DaemonState::new()?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    // engine thread
    let engine_thread = EngineThread::start(state.cfg.profile.clone())?;

    // auto-reload when the active profile file changes on disk
    let _watcher = watch_profiles(&state, tx_req.clone());

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let st_snapshot = state.clone_shallow();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, st_snapshot, tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => match state.cfg.reload() {
                    Ok(_) => {
                        engine_thread.send(PipelineMsg::Swap(state.cfg.profile.clone()));
                        info!("profile reloaded");
                    }
                    Err(e) => error!("reload failed, keeping previous profile: {e}"),
                },
                IpcMsg::UseProfile(name) => match state.cfg.set_active(&name) {
                    Ok(_) => {
                        engine_thread.send(PipelineMsg::Swap(state.cfg.profile.clone()));
                        info!("switched active profile to {}", state.cfg.active_name);
                    }
                    Err(e) => error!("use profile failed: {e}"),
                },
                IpcMsg::Recalibrate(gesture) => {
                    engine_thread.send(PipelineMsg::Recalibrate(gesture));
                }
                IpcMsg::ProfilesChanged(path) => {
                    let active_file = format!("{}.toml", state.cfg.active_name);
                    if path.file_name().and_then(|n| n.to_str()) == Some(active_file.as_str()) {
                        let _ = tx_req.send(IpcMsg::Reload);
                    }
                }
                IpcMsg::Shutdown => {
                    engine_thread.send(PipelineMsg::Shutdown);
                    engine_thread.join();
                    let _ = std::fs::remove_file(&sock);
                    return Ok(());
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn handle_client(
    mut stream: UnixStream,
    st: DaemonState,
    tx_req: mpsc::Sender<IpcMsg>,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" => serde_json::json!({"ok": true, "data": {
            "active_profile": st.cfg.active_name,
            "socket": socket_path(),
            "metrics_socket": super::runtime::metrics_socket_path(),
            "gestures": st.cfg.profile.gestures.len(),
            "chains": st.cfg.profile.chains.len(),
            "morse": st.cfg.profile.morse.len(),
        }}),
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": st.cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
            serde_json::json!({"ok": true, "data": {"active_profile": name}})
        }
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let report = st.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "recalibrate" => {
            let gesture = req
                .get("gesture")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if let Some(g) = &gesture {
                if !st.cfg.profile.gestures.iter().any(|c| &c.id == g) {
                    let msg = format!("unknown gesture: {g}");
                    write!(stream, "{}\n", serde_json::json!({"ok": false, "error": msg}))?;
                    return Ok(());
                }
            }
            let scope = gesture.clone().unwrap_or_else(|| "all gestures".into());
            let _ = tx_req.send(IpcMsg::Recalibrate(gesture));
            serde_json::json!({"ok": true, "data": {"recalibrating": scope}})
        }
        "shutdown" => {
            let _ = write!(
                stream,
                "{}\n",
                serde_json::json!({"ok": true, "data": "shutting down"})
            );
            let _ = tx_req.send(IpcMsg::Shutdown);
            return Ok(());
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    write!(stream, "{}\n", resp)?;
    Ok(())
}

fn watch_profiles(state: &DaemonState, tx: mpsc::Sender<IpcMsg>) -> Option<notify::RecommendedWatcher> {
    let dir = state.cfg.profiles_dir.clone();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            if event.kind.is_modify() || event.kind.is_create() {
                for path in event.paths {
                    let _ = tx.send(IpcMsg::ProfilesChanged(path));
                }
            }
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!("profile watcher unavailable: {e}");
            return None;
        }
    };
    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        warn!("failed to watch {}: {e}", dir.display());
        return None;
    }
    Some(watcher)
}

struct DaemonState {
    pub cfg: DaemonConfigState,
}

impl DaemonState {
    fn new() -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        Ok(Self { cfg })
    }
    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
        }
    }
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Recalibrate(Option<String>),
    ProfilesChanged(std::path::PathBuf),
    Shutdown,
}

struct EngineThread {
    tx: mpsc::Sender<PipelineMsg>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EngineThread {
    fn start(profile: Profile) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            if let Err(e) = run_pipeline(rx, profile) {
                error!("engine pipeline failed: {e}");
            }
        });
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    fn send(&self, msg: PipelineMsg) {
        let _ = self.tx.send(msg);
    }

    fn join(mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path();
    if !sock.exists() {
        return Err(anyhow::anyhow!(
            "facectl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
