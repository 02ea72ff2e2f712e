//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices*. Receives are posted up front with a
//! known byte length and completed later through [`Wait::wait`]; sends are
//! completed by the caller before the send buffer is reused. Messages between
//! one (source, destination, tag) triple are matched in posting order, the
//! same non-overtaking rule MPI gives point-to-point traffic.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::comm_error::CommError;

/// Non-blocking point-to-point communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of the calling process.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive for a message of `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    /// `true` for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Tear down the whole process group after a fatal error.
    fn abort(&self, code: i32) -> ! {
        log::error!("rank {} aborting with code {code}", self.rank());
        std::process::exit(code)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;

    /// Non-blocking completion probe.
    fn is_complete(&mut self) -> bool {
        true
    }
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Typed message tag; protocol phases offset a base tag by the swap index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        CommTag(v)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    pub const fn base(self) -> u16 {
        self.0
    }
    pub const fn offset(self, k: usize) -> u16 {
        self.0.wrapping_add(k as u16)
    }
}

/// Tags for every protocol phase, one block of 256 per phase.
pub mod tags {
    use super::CommTag;

    pub const FORWARD: CommTag = CommTag::new(0x1000);
    pub const REVERSE: CommTag = CommTag::new(0x1100);
    pub const BORDER_COUNT: CommTag = CommTag::new(0x1200);
    pub const BORDER: CommTag = CommTag::new(0x1300);
    pub const EXCHANGE_COUNT: CommTag = CommTag::new(0x1400);
    pub const EXCHANGE: CommTag = CommTag::new(0x1500);
    pub const HOOK_FORWARD: CommTag = CommTag::new(0x1600);
    pub const HOOK_REVERSE: CommTag = CommTag::new(0x1700);
    pub const GATHER: CommTag = CommTag::new(0x1800);
    pub const REDUCE: CommTag = CommTag::new(0x1900);
    pub const BARRIER: CommTag = CommTag::new(0x1A00);
}

/// Compile-time no-op comm for pure serial runs: a single rank that only
/// ever talks to itself through local copies.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: several ranks inside one process, one thread per rank ---

type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct MailState {
    sent: HashMap<Key, u64>,
    posted: HashMap<Key, u64>,
    messages: HashMap<(Key, u64), Bytes>,
}

#[derive(Default)]
struct Mailbox {
    state: Mutex<MailState>,
    arrived: Condvar,
}

/// In-process communicator. Every rank of one [`LocalComm::world`] shares a
/// private mailbox, so independent worlds never see each other's traffic.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Create all ranks of a world of `size` processes.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    ticket: u64,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let mut state = self.mailbox.state.lock();
        loop {
            if let Some(bytes) = state.messages.remove(&(self.key, self.ticket)) {
                return Some(bytes.to_vec());
            }
            self.mailbox.arrived.wait(&mut state);
        }
    }

    fn is_complete(&mut self) -> bool {
        self.mailbox
            .state
            .lock()
            .messages
            .contains_key(&(self.key, self.ticket))
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        let mut state = self.mailbox.state.lock();
        let seq = state.sent.entry(key).or_insert(0);
        let ticket = *seq;
        *seq += 1;
        state
            .messages
            .insert((key, ticket), Bytes::copy_from_slice(buf));
        drop(state);
        self.mailbox.arrived.notify_all();
    }

    fn irecv(&self, peer: usize, tag: u16, _len: usize) -> LocalHandle {
        let key = (peer, self.rank, tag);
        let mut state = self.mailbox.state.lock();
        let seq = state.posted.entry(key).or_insert(0);
        let ticket = *seq;
        *seq += 1;
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key,
            ticket,
        }
    }

    fn abort(&self, code: i32) -> ! {
        panic!("rank {} aborted the local world with code {code}", self.rank)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Arc<Universe>,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, CommError> {
            let universe = mpi::initialize()
                .ok_or_else(|| CommError::transport(0, "MPI was already initialized"))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: Arc::new(universe),
            })
        }
    }

    /// Send request owning a heap copy of the message until completion.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        raw: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            None
        }

        fn is_complete(&mut self) -> bool {
            match self.req.take() {
                Some(req) => match req.test() {
                    Ok(_) => true,
                    Err(req) => {
                        self.req = Some(req);
                        false
                    }
                },
                None => true,
            }
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `raw` came from `Box::into_raw` and the request using it has completed.
            unsafe { drop(Box::from_raw(self.raw)) };
        }
    }

    /// Receive request owning the destination buffer until completion.
    pub struct MpiRecvHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        raw: *mut [u8],
        count: Option<usize>,
        taken: bool,
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                let status = req.wait();
                self.count = Some(status.count(u8::equivalent_datatype()) as usize);
            }
            self.taken = true;
            // SAFETY: the receive has completed, so MPI no longer writes through `raw`.
            let mut data = unsafe { Box::from_raw(self.raw) }.into_vec();
            if let Some(n) = self.count {
                data.truncate(n);
            }
            Some(data)
        }

        fn is_complete(&mut self) -> bool {
            match self.req.take() {
                Some(req) => match req.test() {
                    Ok(status) => {
                        self.count = Some(status.count(u8::equivalent_datatype()) as usize);
                        true
                    }
                    Err(req) => {
                        self.req = Some(req);
                        false
                    }
                },
                None => true,
            }
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            if !self.taken {
                // SAFETY: completed above; the buffer was never handed out.
                unsafe { drop(Box::from_raw(self.raw)) };
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let raw = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the box stays alive until the handle is dropped, after the request completes.
            let slice: &'static [u8] = unsafe { &*raw };
            let req = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                slice,
                i32::from(tag),
            );
            MpiSendHandle {
                req: Some(req),
                raw,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, len: usize) -> MpiRecvHandle {
            let raw = Box::into_raw(vec![0u8; len].into_boxed_slice());
            // SAFETY: as for `isend`; the handle owns the allocation.
            let slice: &'static mut [u8] = unsafe { &mut *raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice, i32::from(tag));
            MpiRecvHandle {
                req: Some(req),
                raw,
                count: None,
                taken: false,
            }
        }

        fn abort(&self, code: i32) -> ! {
            self.world.abort(code)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

/// Block until one pending handle completes; returns its slot and payload.
/// Completed slots are set to `None`. Returns `None` once every slot is empty.
pub fn wait_any<H: Wait>(pending: &mut [Option<H>]) -> Option<(usize, Option<Vec<u8>>)> {
    if pending.iter().all(Option::is_none) {
        return None;
    }
    loop {
        for (i, slot) in pending.iter_mut().enumerate() {
            if slot.as_mut().is_some_and(|h| h.is_complete()) {
                if let Some(h) = slot.take() {
                    return Some((i, h.wait()));
                }
            }
        }
        std::thread::yield_now();
    }
}

/// Wait for a receive and check that exactly `expected` bytes arrived.
pub fn wait_exact<H: Wait>(handle: H, peer: usize, expected: usize) -> Result<Vec<u8>, CommError> {
    match handle.wait() {
        Some(data) if data.len() == expected => Ok(data),
        Some(data) => Err(CommError::MessageSize {
            neighbor: peer,
            expected,
            got: data.len(),
        }),
        None => Err(CommError::transport(peer, "receive completed without data")),
    }
}

/// Gather one equally sized record from every rank, ordered by rank.
pub fn all_gather_bytes<C: Communicator>(
    comm: &C,
    tag: CommTag,
    mine: &[u8],
) -> Result<Vec<Vec<u8>>, CommError> {
    if comm.is_no_comm() {
        return Ok(vec![mine.to_vec()]);
    }
    let me = comm.rank();
    let n = comm.size();

    let recvs: Vec<(usize, C::RecvHandle)> = (0..n)
        .filter(|&p| p != me)
        .map(|p| (p, comm.irecv(p, tag.as_u16(), mine.len())))
        .collect();
    let sends: Vec<C::SendHandle> = (0..n)
        .filter(|&p| p != me)
        .map(|p| comm.isend(p, tag.as_u16(), mine))
        .collect();

    let mut out = vec![Vec::new(); n];
    out[me] = mine.to_vec();
    let mut maybe_err = None;
    for (p, h) in recvs {
        match wait_exact(h, p, mine.len()) {
            Ok(data) => out[p] = data,
            Err(e) => {
                maybe_err.get_or_insert(e);
            }
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Global sum of one unsigned count per rank.
pub fn all_reduce_sum_u64<C: Communicator>(comm: &C, value: u64) -> Result<u64, CommError> {
    let mine = [value.to_le()];
    let gathered = all_gather_bytes(comm, tags::REDUCE, cast_slice(&mine))?;
    Ok(gathered
        .iter()
        .map(|bytes| {
            let mut v = [0u64];
            cast_slice_mut(&mut v).copy_from_slice(bytes);
            u64::from_le(v[0])
        })
        .sum())
}

/// Synchronize all ranks.
pub fn barrier<C: Communicator>(comm: &C) -> Result<(), CommError> {
    let token = [WireCount::new(comm.rank())];
    all_gather_bytes(comm, tags::BARRIER, cast_slice(&token)).map(|_| ())
}
