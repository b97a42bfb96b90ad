//! Probe identities.
//!
//! Every probe carries two 16-bit values that let the receive loop map a reply
//! back to the probe that caused it:
//!
//! * a *source identity* derived from the process id, so that concurrent
//!   instances on the same host ignore each other's replies;
//! * a *destination identity* which is the echo sequence number for the echo
//!   prober, or `start + (hop - 1) * queries + offset` for hop discovery.
//!
//! For UDP and TCP probes the two values travel in the source and destination
//! ports; for ICMP probes they travel in the echo identifier and sequence.

/// Low 16 bits of the process id.
pub fn process_tag() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Source identity used by hop discovery probes.
/// The high bit keeps UDP/TCP source ports out of the privileged range.
pub fn hop_source_identity(tag: u16) -> u16 {
    tag | 0x8000
}

/// Maps `(hop, offset)` pairs to destination identities and back.
///
/// ```
/// use netprobe::identity::HopIndex;
///
/// let index = HopIndex::new(33434, 3);
/// assert_eq!(index.encode(1, 0), 33434);
/// assert_eq!(index.encode(2, 1), 33438);
/// assert_eq!(index.decode(33438), Some((2, 1)));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HopIndex {
    start: u16,
    queries: usize,
}

impl HopIndex {
    pub fn new(start: u16, queries: usize) -> Self {
        HopIndex {
            start,
            queries: queries.max(1),
        }
    }

    pub fn encode(&self, hop: u8, offset: usize) -> u16 {
        let index = (hop.saturating_sub(1) as usize) * self.queries + offset;
        self.start.wrapping_add(index as u16)
    }

    /// Returns `None` when the identity maps outside of the TTL range.
    pub fn decode(&self, identity: u16) -> Option<(u8, usize)> {
        let index = identity.wrapping_sub(self.start) as usize;
        let hop = index / self.queries + 1;
        let hop = u8::try_from(hop).ok()?;
        Some((hop, index % self.queries))
    }
}

/// Echo request sequence numbers: start at 1, wrap back to 1 before 65535.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sequence(u16);

impl Default for Sequence {
    fn default() -> Self {
        Sequence(1)
    }
}

impl Sequence {
    pub fn current(&self) -> u16 {
        self.0
    }

    /// Return the current sequence number and advance the counter.
    pub fn advance(&mut self) -> u16 {
        let current = self.0;
        self.0 = if current >= 65534 { 1 } else { current + 1 };
        current
    }
}
