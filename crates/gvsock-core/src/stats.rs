//! Per-manager socket statistics.
//!
//! One relaxed `AtomicU64` per counter, bumped on the paths that open,
//! close and fail sockets:
//!
//! ```text
//!   create ─► Open / OpenFail          bind ─► BindFail
//!   connect ─► Connect / ConnectFail   accept ─► Accept / AcceptFail
//!   recv ─► RecvFail                   send ─► SendFail
//!   destroy ─► Close
//!   Active = sockets currently in the registry (gauge)
//! ```

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatCounter {
    Open = 0,
    OpenFail,
    Close,
    BindFail,
    ConnectFail,
    Connect,
    AcceptFail,
    Accept,
    SendFail,
    RecvFail,
    Active,
}

pub const NUM_COUNTERS: usize = 11;

impl StatCounter {
    pub const ALL: [StatCounter; NUM_COUNTERS] = [
        StatCounter::Open,
        StatCounter::OpenFail,
        StatCounter::Close,
        StatCounter::BindFail,
        StatCounter::ConnectFail,
        StatCounter::Connect,
        StatCounter::AcceptFail,
        StatCounter::Accept,
        StatCounter::SendFail,
        StatCounter::RecvFail,
        StatCounter::Active,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            StatCounter::Open => "open",
            StatCounter::OpenFail => "openfail",
            StatCounter::Close => "close",
            StatCounter::BindFail => "bindfail",
            StatCounter::ConnectFail => "connectfail",
            StatCounter::Connect => "connect",
            StatCounter::AcceptFail => "acceptfail",
            StatCounter::Accept => "accept",
            StatCounter::SendFail => "sendfail",
            StatCounter::RecvFail => "recvfail",
            StatCounter::Active => "active",
        }
    }
}

/// Live counters. Shared by every socket of one manager.
pub struct SocketStats {
    counters: [AtomicU64; NUM_COUNTERS],
}

impl SocketStats {
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            counters: [ZERO; NUM_COUNTERS],
        }
    }

    #[inline]
    pub fn bump(&self, counter: StatCounter) {
        self.counters[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Only meaningful for the `Active` gauge. Never goes below zero.
    #[inline]
    pub fn drop_one(&self, counter: StatCounter) {
        let _ = self.counters[counter as usize].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            v.checked_sub(1)
        });
    }

    #[inline]
    pub fn get(&self, counter: StatCounter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut values = [0; NUM_COUNTERS];
        for (value, counter) in values.iter_mut().zip(self.counters.iter()) {
            *value = counter.load(Ordering::Relaxed);
        }
        StatsSnapshot { values }
    }
}

impl Default for SocketStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SocketStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.snapshot(), f)
    }
}

/// Point-in-time copy of every counter.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    values: [u64; NUM_COUNTERS],
}

impl StatsSnapshot {
    #[inline]
    pub fn get(&self, counter: StatCounter) -> u64 {
        self.values[counter as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (StatCounter, u64)> + '_ {
        StatCounter::ALL.iter().map(move |&c| (c, self.get(c)))
    }
}

impl fmt::Debug for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (counter, value) in self.iter() {
            map.entry(&counter.name(), &value);
        }
        map.finish()
    }
}

/// One `name value` line per counter.
impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (counter, value) in self.iter() {
            writeln!(f, "{:<12} {}", counter.name(), value)?;
        }
        Ok(())
    }
}
