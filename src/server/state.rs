//! Server state shared between the server thread and the controller.
//!
//! Written by the server thread and read lock-free by
//! [`EventServer`](super::EventServer). The controller writes only to begin a
//! run and to force `Stopped` when a shutdown signal goes unacknowledged.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Protocol state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Not running; no endpoints are bound.
    Stopped,
    /// Bound, waiting for a client handshake.
    Waiting,
    /// A client completed the handshake; notifications are delivered.
    Receiving,
}

impl ServerState {
    fn to_u8(self) -> u8 {
        match self {
            ServerState::Stopped => 0,
            ServerState::Waiting => 1,
            ServerState::Receiving => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Waiting,
            2 => ServerState::Receiving,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Waiting => write!(f, "waiting"),
            ServerState::Receiving => write!(f, "receiving"),
        }
    }
}

/// Ports allocated for the network endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ports {
    /// Port of the subscribe endpoint (notifications)
    pub subscribe: u16,
    /// Port of the reply endpoint (handshake)
    pub reply: u16,
}

impl Ports {
    fn pack(self) -> u32 {
        (u32::from(self.subscribe) << 16) | u32::from(self.reply)
    }

    fn unpack(value: u32) -> Option<Self> {
        if value == 0 {
            return None;
        }
        Some(Self {
            subscribe: (value >> 16) as u16,
            reply: (value & 0xffff) as u16,
        })
    }
}

impl fmt::Display for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscribe={} reply={}", self.subscribe, self.reply)
    }
}

const PORTS_MASK: u64 = 0xffff_ffff;
const STATE_SHIFT: u32 = 32;
const STATE_MASK: u64 = 0b11;
const GENERATION_SHIFT: u32 = 34;
const GENERATION_MASK: u32 = (1 << 30) - 1;

fn compose(generation: u32, state: ServerState, ports: u32) -> u64 {
    (u64::from(generation) << GENERATION_SHIFT)
        | (u64::from(state.to_u8()) << STATE_SHIFT)
        | u64::from(ports)
}

fn generation_of(word: u64) -> u32 {
    (word >> GENERATION_SHIFT) as u32
}

fn state_of(word: u64) -> ServerState {
    ServerState::from_u8(((word >> STATE_SHIFT) & STATE_MASK) as u8)
}

/// Atomically published state and ports of the current run.
///
/// State, ports and a run generation share one atomic word, so ports are
/// present iff the state is not `Stopped`. Each `start()` begins a new
/// generation; a server thread left over from an earlier run sees `Stopped`
/// and can no longer write.
#[derive(Debug, Default)]
pub struct Status {
    word: AtomicU64,
}

impl Status {
    pub fn state(&self) -> ServerState {
        state_of(self.word.load(Ordering::Acquire))
    }

    pub fn ports(&self) -> Option<Ports> {
        let word = self.word.load(Ordering::Acquire);
        if state_of(word) == ServerState::Stopped {
            return None;
        }
        Ports::unpack((word & PORTS_MASK) as u32)
    }

    /// Start a new run in `Stopped`, superseding any earlier run.
    pub(crate) fn begin(self: &Arc<Self>) -> RunStatus {
        let previous = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let next = generation_of(word).wrapping_add(1) & GENERATION_MASK;
                Some(compose(next, ServerState::Stopped, 0))
            })
            .unwrap_or_else(|word| word);
        RunStatus {
            status: Arc::clone(self),
            generation: generation_of(previous).wrapping_add(1) & GENERATION_MASK,
        }
    }

    /// Force `Stopped` on whichever run is current.
    pub(crate) fn stopped(&self) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(compose(generation_of(word), ServerState::Stopped, 0))
            });
    }
}

/// One run's view of [`Status`], held by its server thread.
#[derive(Debug, Clone)]
pub struct RunStatus {
    status: Arc<Status>,
    generation: u32,
}

impl RunStatus {
    /// Run counter, starting at 1 for the first run of a server.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// State of this run; `Stopped` once a later run began.
    pub fn state(&self) -> ServerState {
        let word = self.status.word.load(Ordering::Acquire);
        if generation_of(word) != self.generation {
            return ServerState::Stopped;
        }
        state_of(word)
    }

    fn update(&self, f: impl Fn(u64) -> Option<u64>) -> bool {
        self.status
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                if generation_of(word) != self.generation {
                    return None;
                }
                f(word)
            })
            .is_ok()
    }

    /// Record bound ports and enter `Waiting`.
    pub(crate) fn running(&self, ports: Ports) -> bool {
        self.update(|_| Some(compose(self.generation, ServerState::Waiting, ports.pack())))
    }

    /// Switch between `Waiting` and `Receiving`.
    ///
    /// Never leaves `Stopped`; returns false if the run was stopped meanwhile.
    pub(crate) fn set(&self, state: ServerState) -> bool {
        debug_assert!(state != ServerState::Stopped);
        self.update(|word| {
            (state_of(word) != ServerState::Stopped)
                .then(|| compose(self.generation, state, (word & PORTS_MASK) as u32))
        })
    }

    /// Enter `Stopped` and clear ports, unless a later run began.
    pub(crate) fn stopped(&self) {
        self.update(|_| Some(compose(self.generation, ServerState::Stopped, 0)));
    }
}
