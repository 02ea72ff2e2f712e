//! Flat send/receive buffers shared by every protocol.
//!
//! The send buffer holds the message for one partner at a time and keeps
//! `extra` slack past `maxsend` so that a whole exchange record fits after
//! the last size check. The receive buffer holds every message of one swap
//! (or one exchange axis) at its precomputed offset.
//!
//! Growing a buffer reallocates it; slices taken earlier must be re-fetched.

use crate::config::BufferPolicy;

#[derive(Clone, Debug, PartialEq)]
pub struct CommBuffers {
    send: Vec<f64>,
    recv: Vec<f64>,
    maxsend: usize,
    maxrecv: usize,
    extra: usize,
    factor: f64,
}

impl CommBuffers {
    pub fn new(policy: &BufferPolicy) -> Self {
        Self {
            send: vec![0.0; policy.min + policy.extra],
            recv: vec![0.0; policy.min],
            maxsend: policy.min,
            maxrecv: policy.min,
            extra: policy.extra,
            factor: policy.factor,
        }
    }

    #[inline]
    pub fn maxsend(&self) -> usize {
        self.maxsend
    }

    #[inline]
    pub fn maxrecv(&self) -> usize {
        self.maxrecv
    }

    pub fn extra(&self) -> usize {
        self.extra
    }

    /// Raise the send slack, keeping current contents.
    pub fn set_extra(&mut self, extra: usize) {
        if extra > self.extra {
            self.extra = extra;
            self.send.resize(self.maxsend + self.extra, 0.0);
        }
    }

    /// Grow the send buffer to hold `n` values plus slack. With `preserve`
    /// the current contents survive, otherwise they are discarded.
    pub fn grow_send(&mut self, n: usize, preserve: bool) {
        self.maxsend = (self.factor * n as f64) as usize;
        let len = self.maxsend + self.extra;
        if preserve {
            self.send.resize(len, 0.0);
        } else {
            self.send = vec![0.0; len];
        }
    }

    /// Grow the receive buffer to hold `n` values, discarding its contents.
    pub fn grow_recv(&mut self, n: usize) {
        self.maxrecv = (self.factor * n as f64) as usize;
        self.recv = vec![0.0; self.maxrecv];
    }

    /// Make room for `n` send values if needed.
    pub fn reserve_send(&mut self, n: usize) {
        if n > self.maxsend {
            self.grow_send(n, false);
        }
    }

    /// Make room for `n` receive values if needed.
    pub fn reserve_recv(&mut self, n: usize) {
        if n > self.maxrecv {
            self.grow_recv(n);
        }
    }

    #[inline]
    pub fn send(&self) -> &[f64] {
        &self.send
    }

    #[inline]
    pub fn send_mut(&mut self) -> &mut [f64] {
        &mut self.send
    }

    #[inline]
    pub fn recv(&self) -> &[f64] {
        &self.recv
    }

    #[inline]
    pub fn recv_mut(&mut self) -> &mut [f64] {
        &mut self.recv
    }

    pub fn memory_usage(&self) -> usize {
        (self.send.capacity() + self.recv.capacity()) * std::mem::size_of::<f64>()
    }
}
