//! Per-hop probe outcomes of a hop discovery run.
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

/// Outcome of one probe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Pending,
    Responded { addr: IpAddr, rtt: Duration },
    TimedOut,
}

impl Slot {
    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }
}

/// A dense table of `queries` slots for every hop in `[first_ttl, max_ttl]`.
///
/// A slot leaves `Pending` exactly once: the first reply or the timeout sweep
/// wins, later writes are ignored.
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use std::time::{Duration, SystemTime};
/// use netprobe::hop_table::{HopTable, Slot};
///
/// let mut table = HopTable::new(1, 30, 3);
/// let sent_at = SystemTime::now();
/// table.record_send(1, 0, sent_at);
/// let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
/// assert!(table.record_reply(1, 0, addr, sent_at + Duration::from_millis(2)));
/// assert_eq!(
///     table.slot(1, 0),
///     Some(&Slot::Responded { addr, rtt: Duration::from_millis(2) })
/// );
/// ```
#[derive(Clone, Debug)]
pub struct HopTable {
    first_ttl: u8,
    max_ttl: u8,
    queries: usize,
    slots: Vec<Slot>,
    sent_at: Vec<Option<SystemTime>>,
}

impl HopTable {
    pub fn new(first_ttl: u8, max_ttl: u8, queries: usize) -> Self {
        let hops = (max_ttl as usize + 1).saturating_sub(first_ttl as usize);
        HopTable {
            first_ttl,
            max_ttl,
            queries,
            slots: vec![Slot::Pending; hops * queries],
            sent_at: vec![None; hops * queries],
        }
    }

    pub fn first_ttl(&self) -> u8 {
        self.first_ttl
    }

    pub fn max_ttl(&self) -> u8 {
        self.max_ttl
    }

    pub fn queries(&self) -> usize {
        self.queries
    }

    fn position(&self, ttl: u8, offset: usize) -> Option<usize> {
        if ttl < self.first_ttl || ttl > self.max_ttl || offset >= self.queries {
            return None;
        }
        Some((ttl - self.first_ttl) as usize * self.queries + offset)
    }

    pub fn slot(&self, ttl: u8, offset: usize) -> Option<&Slot> {
        self.position(ttl, offset).map(|i| &self.slots[i])
    }

    /// The slots of a hop, `None` outside of the TTL range.
    pub fn hop(&self, ttl: u8) -> Option<&[Slot]> {
        let start = self.position(ttl, 0)?;
        Some(&self.slots[start..start + self.queries])
    }

    pub fn record_send(&mut self, ttl: u8, offset: usize, timestamp: SystemTime) {
        if let Some(i) = self.position(ttl, offset) {
            self.sent_at[i] = Some(timestamp);
        }
    }

    /// Record a reply to a sent probe.
    /// Returns `false` if the slot is unknown, unsent or already resolved.
    pub fn record_reply(
        &mut self,
        ttl: u8,
        offset: usize,
        addr: IpAddr,
        timestamp: SystemTime,
    ) -> bool {
        let Some(i) = self.position(ttl, offset) else {
            return false;
        };
        match (self.slots[i], self.sent_at[i]) {
            (Slot::Pending, Some(sent_at)) => {
                let rtt = timestamp.duration_since(sent_at).unwrap_or_default();
                self.slots[i] = Slot::Responded { addr, rtt };
                true
            }
            _ => false,
        }
    }

    /// Mark as timed out every pending probe sent at least `wait` before `now`.
    /// Returns the number of slots resolved by the sweep.
    pub fn sweep_timeouts(&mut self, now: SystemTime, wait: Duration) -> usize {
        let mut swept = 0;
        for (slot, sent_at) in self.slots.iter_mut().zip(&self.sent_at) {
            if let (Slot::Pending, Some(sent_at)) = (*slot, sent_at) {
                if now.duration_since(*sent_at).unwrap_or_default() >= wait {
                    *slot = Slot::TimedOut;
                    swept += 1;
                }
            }
        }
        swept
    }

    /// Whether every slot of the hop is resolved.
    pub fn is_resolved(&self, ttl: u8) -> bool {
        self.hop(ttl)
            .map_or(false, |slots| slots.iter().all(|slot| !slot.is_pending()))
    }

    /// The first hop where the destination itself replied.
    pub fn final_hop(&self, dst_addr: IpAddr) -> Option<u8> {
        (self.first_ttl..=self.max_ttl).find(|ttl| {
            self.hop(*ttl).map_or(false, |slots| {
                slots
                    .iter()
                    .any(|slot| matches!(slot, Slot::Responded { addr, .. } if *addr == dst_addr))
            })
        })
    }

    /// Number of hops up to `up_to` with at least one probe sent and not yet resolved.
    pub fn unresolved_hops(&self, up_to: u8) -> usize {
        if up_to < self.first_ttl {
            return 0;
        }
        (self.first_ttl..=up_to.min(self.max_ttl))
            .filter(|ttl| {
                let sent = self.position(*ttl, 0).map_or(false, |i| {
                    self.sent_at[i..i + self.queries]
                        .iter()
                        .any(Option::is_some)
                });
                sent && !self.is_resolved(*ttl)
            })
            .count()
    }
}
