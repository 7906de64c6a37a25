//! The engine loop: consume metric frames from the collaborator socket,
//! run one engine pass per frame, hand the resolved events to the sink.

use anyhow::Result;
use log::{error, info, warn};
use std::{
    io::{BufRead, BufReader, ErrorKind},
    os::unix::net::{UnixListener, UnixStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::Receiver,
    },
    thread,
    time::Duration,
};

use super::runtime;
use crate::actions::UinputSink;
use crate::config::Profile;
use crate::engine::{Engine, dispatch::Dispatcher};
use crate::metrics::MetricFrame;

/// Control messages from the IPC server into the engine loop. Applied
/// between frames, so a frame never runs under a half-swapped profile.
pub enum PipelineMsg {
    Swap(Profile),
    Recalibrate(Option<String>),
    Shutdown,
}

pub fn run_pipeline(rx: Receiver<PipelineMsg>, initial: Profile) -> Result<()> {
    let sock = runtime::metrics_socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    listener.set_nonblocking(true)?;
    info!("pipeline: metrics socket at {}", sock.display());

    let mut engine = Engine::new(&initial).map_err(|e| anyhow::anyhow!("initial profile: {e}"))?;
    let mut dispatcher = Dispatcher::new(UinputSink::new().unwrap_or_else(|_| UinputSink::noop()));

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;

    let mut client: Option<BufReader<UnixStream>> = None;
    let mut line = String::new();

    'run: loop {
        if term.load(Ordering::Relaxed) {
            info!("pipeline: signal received, shutting down");
            break;
        }

        while let Ok(msg) = rx.try_recv() {
            match msg {
                PipelineMsg::Swap(profile) => match engine.swap_profile(&profile) {
                    Ok(releases) => dispatcher.dispatch(&releases),
                    Err(e) => error!("pipeline: rejected profile, keeping active one: {e}"),
                },
                PipelineMsg::Recalibrate(gesture) => engine.recalibrate(gesture.as_deref()),
                PipelineMsg::Shutdown => break 'run,
            }
        }

        if client.is_none() {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(Duration::from_millis(50)))?;
                    info!("pipeline: landmark collaborator connected");
                    client = Some(BufReader::new(stream));
                }
                Err(_) => {
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
            }
        }

        if let Some(reader) = client.as_mut() {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    info!("pipeline: metrics stream closed");
                    client = None;
                }
                Ok(_) => match MetricFrame::parse_line(&line) {
                    Ok(frame) => {
                        let events = engine.process_frame(&frame);
                        dispatcher.dispatch(&events);
                    }
                    Err(e) => warn!("pipeline: {e}"),
                },
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => {
                    warn!("pipeline: metrics read failed: {e}");
                    client = None;
                }
            }
        }
    }

    // let go of everything still held before the virtual device disappears
    let releases = engine.release_all();
    dispatcher.dispatch(&releases);
    dispatcher.release_all();
    let _ = std::fs::remove_file(&sock);
    Ok(())
}
