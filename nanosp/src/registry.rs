//! Socket registry: maps integer descriptors to live sockets.
//!
//! Descriptors encode a slot index (low 16 bits) and the slot's generation
//! (the 15 bits above it), so they are always non-negative and a descriptor
//! kept after `close` never resolves to the socket that reuses its slot.
//!
//! ```text
//!  31  30            16 15             0
//! +---+----------------+----------------+
//! | 0 |   generation   |   slot index   |
//! +---+----------------+----------------+
//! ```

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use nanosp_core::error::{NanospError, Result};
use nanosp_core::options::SocketOptions;
use nanosp_core::protocol::{Domain, Protocol};
use nanosp_proto::PairSocket;

/// Integer handle naming a socket.
pub type Descriptor = i32;

/// Default socket limit, as in nanomsg.
pub const DEFAULT_MAX_SOCKETS: usize = 512;

const INDEX_BITS: u32 = 16;
const INDEX_MASK: i32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = 0x7FFF;
const MAX_SLOTS: usize = 1 << INDEX_BITS;

/// Registry limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Most sockets open at once. Capped at 65536.
    pub max_sockets: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sockets: DEFAULT_MAX_SOCKETS,
        }
    }
}

enum Slot {
    Free,
    Live(Arc<PairSocket>),
    /// Being destroyed: lookups fail but the index is not reusable yet.
    Closing,
}

struct Entry {
    generation: u32,
    slot: Slot,
}

struct Table {
    entries: Vec<Entry>,
    free: Vec<usize>,
    live: usize,
    terminated: bool,
}

fn encode(generation: u32, index: usize) -> Descriptor {
    (((generation & GENERATION_MASK) as i32) << INDEX_BITS) | index as i32
}

fn decode(descriptor: Descriptor) -> Option<(u32, usize)> {
    if descriptor < 0 {
        return None;
    }
    Some((
        (descriptor >> INDEX_BITS) as u32,
        (descriptor & INDEX_MASK) as usize,
    ))
}

/// Table of live sockets.
///
/// The table lock is never held while a socket is closed, so a slow linger
/// on one socket does not stall the others.
pub struct Registry {
    max_sockets: usize,
    table: Mutex<Table>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            max_sockets: config.max_sockets.clamp(1, MAX_SLOTS),
            table: Mutex::new(Table {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
                terminated: false,
            }),
        }
    }

    /// Create a socket and return its descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidDomain`, `InvalidProtocol`, `TooManySockets` when the table is
    /// full, `Terminated` after [`Registry::terminate`].
    pub fn create(&self, domain: i32, protocol: i32) -> Result<Descriptor> {
        let domain = Domain::from_raw(domain)?;
        let protocol = Protocol::from_raw(protocol)?;

        let mut table = self.table.lock();
        if table.terminated {
            return Err(NanospError::Terminated);
        }

        let index = match table.free.pop() {
            Some(index) => index,
            None if table.entries.len() < self.max_sockets => {
                table.entries.push(Entry {
                    generation: 0,
                    slot: Slot::Free,
                });
                table.entries.len() - 1
            }
            None => return Err(NanospError::TooManySockets),
        };

        let socket = PairSocket::new(domain, protocol, SocketOptions::default());
        let entry = &mut table.entries[index];
        entry.slot = Slot::Live(socket);
        let descriptor = encode(entry.generation, index);
        table.live += 1;

        debug!(descriptor, index, "[REGISTRY] Created {} socket", protocol);
        Ok(descriptor)
    }

    /// Resolve a descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` for unknown, stale or closing descriptors.
    pub fn lookup(&self, descriptor: Descriptor) -> Result<Arc<PairSocket>> {
        let (generation, index) = decode(descriptor).ok_or(NanospError::InvalidDescriptor)?;
        let table = self.table.lock();
        match table.entries.get(index) {
            Some(Entry {
                generation: current,
                slot: Slot::Live(socket),
            }) if *current == generation => Ok(socket.clone()),
            _ => Err(NanospError::InvalidDescriptor),
        }
    }

    /// Close the socket and release its descriptor.
    ///
    /// The descriptor stops resolving before the socket is closed, and its
    /// slot only becomes reusable once the close has finished.
    pub fn destroy(&self, descriptor: Descriptor) -> Result<()> {
        let (generation, index) = decode(descriptor).ok_or(NanospError::InvalidDescriptor)?;

        let socket = {
            let mut table = self.table.lock();
            let entry = match table.entries.get_mut(index) {
                Some(entry) if entry.generation == generation => entry,
                _ => return Err(NanospError::InvalidDescriptor),
            };
            match std::mem::replace(&mut entry.slot, Slot::Closing) {
                Slot::Live(socket) => socket,
                other => {
                    entry.slot = other;
                    return Err(NanospError::InvalidDescriptor);
                }
            }
        };

        let closed = socket.close();
        self.release(index);
        debug!(descriptor, "[REGISTRY] Destroyed socket");

        match closed {
            // Closed directly through the socket handle; the slot is still ours.
            Err(NanospError::InvalidDescriptor) => Ok(()),
            other => other,
        }
    }

    fn release(&self, index: usize) {
        let mut table = self.table.lock();
        let entry = &mut table.entries[index];
        entry.generation = (entry.generation + 1) & GENERATION_MASK;
        entry.slot = Slot::Free;
        table.free.push(index);
        table.live -= 1;
    }

    /// Close every socket and refuse to create new ones.
    ///
    /// Calls blocked on those sockets return `Shutdown`.
    pub fn terminate(&self) {
        let sockets: Vec<(usize, Arc<PairSocket>)> = {
            let mut table = self.table.lock();
            table.terminated = true;
            table
                .entries
                .iter_mut()
                .enumerate()
                .filter_map(|(index, entry)| {
                    match std::mem::replace(&mut entry.slot, Slot::Closing) {
                        Slot::Live(socket) => Some((index, socket)),
                        other => {
                            entry.slot = other;
                            None
                        }
                    }
                })
                .collect()
        };

        debug!(count = sockets.len(), "[REGISTRY] Terminating");
        for (index, socket) in sockets {
            let _ = socket.close();
            self.release(index);
        }
    }

    /// True once [`Registry::terminate`] has run.
    pub fn is_terminated(&self) -> bool {
        self.table.lock().terminated
    }

    /// Number of live sockets.
    pub fn len(&self) -> usize {
        self.table.lock().live
    }

    /// True when no socket is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::default);

/// The process-wide registry used by [`crate::nn`].
pub fn global() -> &'static Registry {
    &GLOBAL
}
