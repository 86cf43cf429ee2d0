//! Lifetime counters for transport diagnostics.

/// Counters bumped by the transport as it sends, receives, and expires
/// datagrams. The transport runs on a single tick thread, so these are
/// plain integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCounters {
    /// Message envelopes handed to the channel (first sends only).
    pub datagrams_sent: u64,
    /// Datagrams pulled from the channel, including acks and rejects.
    pub datagrams_received: u64,
    /// Payloads surfaced to the caller.
    pub payloads_delivered: u64,
    /// Reliable envelopes sent again after the resend interval.
    pub resends: u64,
    /// Acks sent for received reliable envelopes.
    pub acks_sent: u64,
    /// Acks received, matched or not.
    pub acks_received: u64,
    /// Acks that matched an in-flight entry.
    pub acks_matched: u64,
    /// Duplicate payloads suppressed by the receive history.
    pub duplicates: u64,
    /// Datagrams dropped for a checksum mismatch.
    pub corrupt: u64,
    /// Datagrams dropped because they could not be decoded at all.
    pub malformed: u64,
    /// In-flight entries dropped because the per-peer window was full.
    pub window_overflows: u64,
    /// In-flight entries dropped at the discard deadline.
    pub discarded: u64,
}

impl TransportCounters {
    /// Fraction of first sends that needed at least one resend, as a
    /// rough link-quality signal. Zero before anything was sent.
    pub fn resend_ratio(&self) -> f64 {
        if self.datagrams_sent == 0 {
            return 0.0;
        }
        self.resends as f64 / self.datagrams_sent as f64
    }

    /// Difference from an earlier snapshot, for per-period reporting.
    pub fn since(&self, earlier: &TransportCounters) -> TransportCounters {
        TransportCounters {
            datagrams_sent: self.datagrams_sent.saturating_sub(earlier.datagrams_sent),
            datagrams_received: self
                .datagrams_received
                .saturating_sub(earlier.datagrams_received),
            payloads_delivered: self
                .payloads_delivered
                .saturating_sub(earlier.payloads_delivered),
            resends: self.resends.saturating_sub(earlier.resends),
            acks_sent: self.acks_sent.saturating_sub(earlier.acks_sent),
            acks_received: self.acks_received.saturating_sub(earlier.acks_received),
            acks_matched: self.acks_matched.saturating_sub(earlier.acks_matched),
            duplicates: self.duplicates.saturating_sub(earlier.duplicates),
            corrupt: self.corrupt.saturating_sub(earlier.corrupt),
            malformed: self.malformed.saturating_sub(earlier.malformed),
            window_overflows: self
                .window_overflows
                .saturating_sub(earlier.window_overflows),
            discarded: self.discarded.saturating_sub(earlier.discarded),
        }
    }
}
