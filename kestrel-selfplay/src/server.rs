//! Coordinator: shared worker state and the start/stop lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use kestrel_core::network::ModelHandle;

use crate::buffer::ReplayBuffer;
use crate::generator::generator_main;
use crate::settings::Settings;
use crate::trainer::trainer_main;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum StatusCode {
    Stopped = 0,
    Running = 1,
    Waiting = 2,
}

/// Worker status: an atomic code plus a mutex-guarded message slot.
pub struct Status {
    code: AtomicU8,
    message: Mutex<String>,
}

impl Status {
    fn new() -> Self {
        Status {
            code: AtomicU8::new(StatusCode::Stopped as u8),
            message: Mutex::new(String::new()),
        }
    }

    pub fn code(&self) -> StatusCode {
        match self.code.load(Ordering::Acquire) {
            0 => StatusCode::Stopped,
            1 => StatusCode::Running,
            _ => StatusCode::Waiting,
        }
    }

    pub fn set_code(&self, code: StatusCode) {
        self.code.store(code as u8, Ordering::Release);
    }

    pub fn message(&self) -> String {
        self.message.lock().unwrap().clone()
    }

    pub fn set_message(&self, message: String) {
        *self.message.lock().unwrap() = message;
    }
}

/// Everything the worker threads share.
pub struct ServerState {
    pub settings: Settings,
    pub model: ModelHandle,
    pub buffer: ReplayBuffer,
    pub status: Status,

    /// PGN handoff: the flag is raised by [SelfplayServer::get_next_pgn] and
    /// serviced by a search worker at the next terminal game boundary.
    pub wants_pgn: AtomicBool,
    pub ret_pgn: Mutex<Option<String>>,

    /// Uncommitted-trajectory count per search worker, indexable by worker id.
    pub partials: Vec<AtomicUsize>,
}

impl ServerState {
    pub fn new(settings: Settings, model: ModelHandle) -> Self {
        let buffer = ReplayBuffer::new(
            model.obs_len(),
            model.policy_len(),
            settings.replaybuffer_size,
        );
        let partials = (0..settings.inference_threads).map(|_| AtomicUsize::new(0)).collect();

        ServerState {
            settings,
            model,
            buffer,
            status: Status::new(),
            wants_pgn: AtomicBool::new(false),
            ret_pgn: Mutex::new(None),
            partials,
        }
    }
}

/// Owns the worker pools and exposes the external control surface.
pub struct SelfplayServer {
    state: Arc<ServerState>,
    workers: Vec<JoinHandle<()>>,
}

impl SelfplayServer {
    pub fn new(settings: Settings, model: ModelHandle) -> Self {
        SelfplayServer {
            state: Arc::new(ServerState::new(settings, model)),
            workers: vec![],
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn start(&mut self) {
        assert_eq!(self.state.status.code(), StatusCode::Stopped, "already started");
        self.state.status.set_code(StatusCode::Running);

        for id in 0..self.state.settings.inference_threads {
            let state = self.state.clone();
            let handle = std::thread::Builder::new()
                .name(format!("generator-{}", id))
                .spawn(move || generator_main(id, state))
                .unwrap();
            self.workers.push(handle);
        }

        for id in 0..self.state.settings.training_threads {
            let state = self.state.clone();
            let handle = std::thread::Builder::new()
                .name(format!("trainer-{}", id))
                .spawn(move || trainer_main(id, state))
                .unwrap();
            self.workers.push(handle);
        }

        info!(
            generators = self.state.settings.inference_threads,
            trainers = self.state.settings.training_threads,
            "selfplay started"
        );
    }

    /// Stop all workers: RUNNING -> WAITING, join, -> STOPPED.
    pub fn stop(&mut self) {
        assert_eq!(self.state.status.code(), StatusCode::Running, "not running");
        self.state.status.set_code(StatusCode::Waiting);

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("a worker thread panicked before shutdown");
            }
        }

        self.state.status.set_code(StatusCode::Stopped);
        info!("selfplay stopped");
    }

    /// Block until a search worker finishes a game and hands its PGN over.
    /// Returns `None` when the server is not running.
    pub fn get_next_pgn(&self) -> Option<String> {
        if self.state.status.code() != StatusCode::Running {
            return None;
        }

        self.state.wants_pgn.store(true, Ordering::Release);
        loop {
            if let Some(pgn) = self.state.ret_pgn.lock().unwrap().take() {
                return Some(pgn);
            }
            if self.state.status.code() != StatusCode::Running {
                self.state.wants_pgn.store(false, Ordering::Release);
                return None;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}
