use crate::error::ChatApiError;

/// Undecodable bytes tolerated before a stream is declared corrupt.
pub const DEFAULT_PENDING_LIMIT: usize = 100;

/// Reassembles UTF-8 text from arbitrarily split network reads.
///
/// A multi-byte character cut by a read boundary stays buffered until the rest
/// of its bytes arrive; nothing is dropped or replaced. Bytes that can never
/// decode are held until they exceed the pending limit, at which point the
/// stream is reported as corrupt.
#[derive(Debug)]
pub struct Utf8Reassembler {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for Utf8Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_LIMIT)
    }
}

impl Utf8Reassembler {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    /// Append `bytes` and return every character that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Result<String, ChatApiError> {
        self.pending.extend_from_slice(bytes);

        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let decoded = text.to_owned();
                self.pending.clear();
                Ok(decoded)
            }
            Err(error) => {
                let valid = error.valid_up_to();
                let decoded = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);

                if error.error_len().is_some() && self.pending.len() > self.limit {
                    return Err(ChatApiError::InvalidUtf8 {
                        pending: self.pending.len(),
                    });
                }

                Ok(decoded)
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take whatever bytes never formed complete characters.
    pub fn take_residual(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}
