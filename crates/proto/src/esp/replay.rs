//! Anti-replay sequence tracking for inbound ESP contexts
//!
//! `next_seq` is the sequence number *after* the newest packet accepted
//! so far; packet `next_seq - 1` is received by definition. The 64-bit
//! backlog bitmap covers the 64 packets before that, LSB representing
//! `next_seq - 2` and MSB `next_seq - 65`. A set bit marks a packet not
//! seen yet (still admissible), a clear bit one already received.
//!
//! This allows out-of-order delivery within a 64-packet interval of the
//! newest packet while rejecting anything replayed or older than the
//! window. Peers number their first packet 0, so a fresh window accepts
//! sequence 0 as the expected case.

/// Packets admissible out of order behind the newest one
pub const SEQ_BACKLOG_WINDOW: u64 = 64;

/// Outcome of a sequence-number admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqVerdict {
    /// The packet expected next
    Expected,
    /// Within the backlog window and not seen before
    OutOfOrder,
    /// Newer than expected; intervening packets were missed
    Future,
    /// Older than the backlog window reaches
    Ancient,
    /// Already received
    Replayed,
}

impl SeqVerdict {
    /// Whether the packet passed admission
    pub fn accepted(&self) -> bool {
        matches!(self, SeqVerdict::Expected | SeqVerdict::OutOfOrder | SeqVerdict::Future)
    }
}

/// Sliding admission window over inbound sequence numbers
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    next_seq: u64,
    backlog: u64,
}

impl ReplayWindow {
    /// Create a fresh window expecting sequence 0
    pub fn new() -> Self {
        Self::default()
    }

    /// The next expected sequence number
    ///
    /// Also feeds the old-context admission ceiling after a rekey.
    pub fn next_expected(&self) -> u64 {
        self.next_seq
    }

    /// Check one received sequence number and update the window
    pub fn check_and_update(&mut self, seq: u32) -> SeqVerdict {
        let seq = u64::from(seq);

        if seq == self.next_seq {
            // The common case, exactly the packet expected next.
            self.backlog <<= 1;
            self.next_seq += 1;
            SeqVerdict::Expected
        } else if seq > self.next_seq {
            // The packet we were expecting went missing; this one is newer.
            let delta = seq - self.next_seq;

            if delta >= SEQ_BACKLOG_WINDOW {
                // Jumped past the whole window; none of the previous
                // 64 packets were seen.
                self.backlog = u64::MAX;
            } else if delta == SEQ_BACKLOG_WINDOW - 1 {
                // A shift by 64 would overflow. The clear top bit is the
                // old next_seq - 1, which is received by definition.
                self.backlog = u64::MAX >> 1;
            } else {
                // Mark the missed packets admissible and shift the rest up.
                self.backlog <<= delta + 1;
                self.backlog |= (1u64 << delta) - 1;
            }
            self.next_seq = seq + 1;
            SeqVerdict::Future
        } else if seq + SEQ_BACKLOG_WINDOW + 1 < self.next_seq {
            SeqVerdict::Ancient
        } else if seq == self.next_seq - 1 {
            // Not in the bitmap since it is received by definition.
            SeqVerdict::Replayed
        } else {
            let mask = 1u64 << (self.next_seq - seq - 2);

            if self.backlog & mask != 0 {
                self.backlog &= !mask;
                SeqVerdict::OutOfOrder
            } else {
                SeqVerdict::Replayed
            }
        }
    }
}
