// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! One OTA transfer session.
//!
//! The image hash is computed incrementally as chunks arrive, so the hash is
//! only correct if chunks are fed in sender order. Flash addressing, by
//! contrast, is derived from the chunk index and tolerates any order. The
//! session therefore enforces strict ordering: a chunk is accepted only if
//! it directly follows the last acknowledged one. A retransmit of that last
//! chunk (its ack was lost) is re-acknowledged without touching flash or the
//! hash; anything else is ignored and the gateway recovers by retrying in
//! order.

use consts::{OTA_CHUNK_SIZE, OTA_HASH_SIZE};
use radio_protocol::OtaImageInfo;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    /// No session. The state at power-up and after a completed or failed
    /// session is superseded by a new `OtaStart`.
    Idle,
    /// Session opened, no chunk accepted yet.
    Started,
    /// At least one chunk accepted.
    Receiving,
    /// Final chunk accepted and the hash verdict recorded.
    Completed,
    /// A flash operation failed; only a fresh `OtaStart` leaves this state.
    Aborted,
}

/// What to do with an arriving chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// In order: hash it, stage it for flash.
    Accept,
    /// Same index as the last acknowledged chunk: re-acknowledge only.
    Retransmit,
    /// Out of order or no session: drop silently.
    Ignore,
}

pub struct OtaSession {
    state: TransferState,
    image_size: u32,
    chunk_count: u32,
    expected_hash: [u8; OTA_HASH_SIZE],
    hasher: Sha256,
    last_chunk_acked: i32,
    hashes_match: bool,
}

impl OtaSession {
    pub fn new() -> Self {
        Self {
            state: TransferState::Idle,
            image_size: 0,
            chunk_count: 0,
            expected_hash: [0; OTA_HASH_SIZE],
            hasher: Sha256::new(),
            last_chunk_acked: -1,
            hashes_match: false,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn hashes_match(&self) -> bool {
        self.hashes_match
    }

    pub fn last_chunk_acked(&self) -> i32 {
        self.last_chunk_acked
    }

    /// Open a fresh session. Clears the previous session's verdict, ack
    /// bookkeeping and hash accumulator.
    pub fn begin(&mut self, image: &OtaImageInfo) {
        self.state = TransferState::Started;
        self.image_size = image.image_size;
        self.chunk_count = image.chunk_count;
        self.expected_hash = image.expected_hash;
        self.hasher.reset();
        self.last_chunk_acked = -1;
        self.hashes_match = false;
    }

    /// Classify an arriving chunk index against the session state.
    pub fn classify(&self, index: u32) -> ChunkDisposition {
        match self.state {
            TransferState::Started | TransferState::Receiving => {
                if index >= self.chunk_count {
                    ChunkDisposition::Ignore
                } else if index as i64 == self.last_chunk_acked as i64 + 1 {
                    ChunkDisposition::Accept
                } else if index as i64 == self.last_chunk_acked as i64 {
                    ChunkDisposition::Retransmit
                } else {
                    ChunkDisposition::Ignore
                }
            }
            _ => ChunkDisposition::Ignore,
        }
    }

    /// Fold an accepted chunk into the running hash. Returns `true` on the
    /// final chunk, after the verdict has been recorded.
    pub fn accept(&mut self, index: u32, data: &[u8]) -> bool {
        debug_assert!(data.len() <= OTA_CHUNK_SIZE);
        self.state = TransferState::Receiving;
        self.hasher.update(data);
        self.last_chunk_acked = index as i32;
        if index == self.chunk_count - 1 {
            let computed = self.hasher.finalize_reset();
            self.hashes_match = computed[..] == self.expected_hash;
            self.state = TransferState::Completed;
            true
        } else {
            false
        }
    }

    /// A flash operation failed; the session is dead until the next
    /// `OtaStart`.
    pub fn abort(&mut self) {
        self.state = TransferState::Aborted;
    }
}

impl Default for OtaSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(payload: &[u8]) -> OtaImageInfo {
        OtaImageInfo {
            image_size: payload.len() as u32,
            chunk_count: (payload.len() as u32).div_ceil(OTA_CHUNK_SIZE as u32),
            expected_hash: Sha256::digest(payload).into(),
        }
    }

    #[test]
    fn in_order_chunks_verify() {
        let payload = [0x5Au8; 256];
        let mut session = OtaSession::new();
        session.begin(&image(&payload));

        assert_eq!(session.classify(0), ChunkDisposition::Accept);
        assert!(!session.accept(0, &payload[..128]));
        assert_eq!(session.state(), TransferState::Receiving);
        assert_eq!(session.classify(1), ChunkDisposition::Accept);
        assert!(session.accept(1, &payload[128..]));
        assert_eq!(session.state(), TransferState::Completed);
        assert!(session.hashes_match());
    }

    #[test]
    fn single_byte_perturbation_fails_verification() {
        let payload = [0x5Au8; 256];
        let mut session = OtaSession::new();
        session.begin(&image(&payload));

        let mut corrupted = payload;
        corrupted[200] ^= 0x01;
        session.accept(0, &corrupted[..128]);
        session.accept(1, &corrupted[128..]);
        assert!(!session.hashes_match());
    }

    #[test]
    fn retransmit_is_not_hashed_twice() {
        let payload = [0x11u8; 192];
        let mut session = OtaSession::new();
        session.begin(&image(&payload));

        session.accept(0, &payload[..128]);
        // The ack for chunk 0 was lost; the gateway sends it again.
        assert_eq!(session.classify(0), ChunkDisposition::Retransmit);
        // Ordinary progress afterwards still verifies.
        assert_eq!(session.classify(1), ChunkDisposition::Accept);
        session.accept(1, &payload[128..]);
        assert!(session.hashes_match());
    }

    #[test]
    fn out_of_order_chunks_are_ignored() {
        let payload = [0x22u8; 384];
        let mut session = OtaSession::new();
        session.begin(&image(&payload));

        assert_eq!(session.classify(1), ChunkDisposition::Ignore);
        assert_eq!(session.classify(2), ChunkDisposition::Ignore);
        session.accept(0, &payload[..128]);
        assert_eq!(session.classify(2), ChunkDisposition::Ignore);
        assert_eq!(session.classify(3), ChunkDisposition::Ignore);
    }

    #[test]
    fn no_session_ignores_chunks() {
        let session = OtaSession::new();
        assert_eq!(session.classify(0), ChunkDisposition::Ignore);
    }

    #[test]
    fn aborted_session_ignores_chunks_until_restarted() {
        let payload = [0x33u8; 128];
        let mut session = OtaSession::new();
        session.begin(&image(&payload));
        session.abort();
        assert_eq!(session.state(), TransferState::Aborted);
        assert_eq!(session.classify(0), ChunkDisposition::Ignore);

        session.begin(&image(&payload));
        assert_eq!(session.classify(0), ChunkDisposition::Accept);
        assert!(session.accept(0, &payload));
        assert!(session.hashes_match());
    }

    #[test]
    fn fresh_session_clears_previous_verdict() {
        let payload = [0x44u8; 128];
        let mut session = OtaSession::new();
        session.begin(&image(&payload));
        session.accept(0, &payload);
        assert!(session.hashes_match());

        session.begin(&image(&payload));
        assert!(!session.hashes_match());
        assert_eq!(session.last_chunk_acked(), -1);
        assert_eq!(session.state(), TransferState::Started);
    }
}
