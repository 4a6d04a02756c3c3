// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Per-request buffer store
//
// One pending buffer per open request. A buffer only ever holds the
// suffix of the stream that has not yet been resolved into a complete
// message, plus any bytes of a UTF-8 sequence split across chunks.

use std::collections::HashMap;

use super::decoder::{decode, FRAME_DELIMITER};
use super::types::{DecodedEvent, RequestId};

// ---------------------------------------------------------------------------
// Pending buffer
// ---------------------------------------------------------------------------

/// Undecoded remainder of one request's stream.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    text: String,
    /// Leading bytes of a multi-byte character whose tail has not arrived.
    utf8_carry: Vec<u8>,
    /// Offset from which to look for the next delimiter. Everything before
    /// it is known to contain none.
    scan_from: usize,
    dropped: usize,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decoded text.
    pub fn push_str(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    /// Append raw network bytes.
    ///
    /// Incomplete trailing UTF-8 sequences are held back until the next
    /// chunk completes them. Invalid sequences become U+FFFD.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        let joined;
        let mut bytes = chunk;
        if !self.utf8_carry.is_empty() {
            let mut carry = std::mem::take(&mut self.utf8_carry);
            carry.extend_from_slice(chunk);
            joined = carry;
            bytes = &joined;
        }

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.text.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    self.text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                        None => {
                            self.utf8_carry = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Bytes currently held, including any carried partial character.
    pub fn len(&self) -> usize {
        self.text.len() + self.utf8_carry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segments dropped by the decoder over this buffer's lifetime.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Decode every complete message and keep only the remainder.
    pub fn drain_events(&mut self) -> Vec<DecodedEvent> {
        if !self.text[self.scan_from..].contains(FRAME_DELIMITER) {
            // A delimiter may straddle the old end of the buffer.
            self.scan_from = self.text.len().saturating_sub(1);
            while !self.text.is_char_boundary(self.scan_from) {
                self.scan_from -= 1;
            }
            return Vec::new();
        }

        let decoded = decode(&self.text);
        self.text = decoded.remainder;
        self.scan_from = 0;
        self.dropped += decoded.dropped;
        decoded.events
    }
}

// ---------------------------------------------------------------------------
// Buffer store
// ---------------------------------------------------------------------------

/// Pending buffers keyed by request. Presence of a key means the request
/// is open.
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: HashMap<RequestId, PendingBuffer>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a request with an empty buffer. Returns false if it was
    /// already open; the existing buffer is left untouched.
    pub fn open(&mut self, id: RequestId) -> bool {
        if self.buffers.contains_key(&id) {
            return false;
        }
        self.buffers.insert(id, PendingBuffer::new());
        true
    }

    pub fn is_open(&self, id: &RequestId) -> bool {
        self.buffers.contains_key(id)
    }

    pub fn get_mut(&mut self, id: &RequestId) -> Option<&mut PendingBuffer> {
        self.buffers.get_mut(id)
    }

    /// Close a request, returning its buffer if it was open.
    pub fn close(&mut self, id: &RequestId) -> Option<PendingBuffer> {
        self.buffers.remove(id)
    }

    /// Close every open request.
    pub fn close_all(&mut self) -> Vec<(RequestId, PendingBuffer)> {
        self.buffers.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
