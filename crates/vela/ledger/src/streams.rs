//! Time-vested payment streams.
//!
//! A stream escrows `amount` from the sender and unlocks it linearly to the
//! recipient between `start_time` and `end_time`.
//!
//! ```text
//! Active --withdraw--> Active --withdraw (all)--> Completed
//!    \
//!     `--cancel--> Cancelled
//! ```

use std::sync::Arc;

use alloy_primitives::{Address, B256, Keccak256, U256};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vela_primitives::{Clock, SystemClock};

use crate::{Custody, LedgerError, LedgerResult, StreamIdPolicy, vested_amount};

/// Stream identity.
pub type StreamId = B256;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamState {
    Active,
    Completed,
    Cancelled,
}

/// A payment stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: StreamId,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub start_time: u64,
    pub end_time: u64,
    pub withdrawn: U256,
    pub state: StreamState,
}

impl Stream {
    pub fn is_active(&self) -> bool {
        self.state == StreamState::Active
    }

    pub fn duration(&self) -> u64 {
        self.end_time - self.start_time
    }

    /// Amount the recipient could withdraw at `now`.
    pub fn available_at(&self, now: u64) -> U256 {
        let elapsed = now.saturating_sub(self.start_time);
        vested_amount(self.amount, elapsed, self.duration()).saturating_sub(self.withdrawn)
    }

    /// Escrowed amount not yet paid out.
    pub fn remaining(&self) -> U256 {
        self.amount - self.withdrawn
    }
}

/// Derive a stream id from the pair and creation time, and an optional nonce.
pub(crate) fn derive_stream_id(
    sender: Address,
    recipient: Address,
    start_time: u64,
    nonce: Option<u64>,
) -> StreamId {
    let mut hasher = Keccak256::new();
    hasher.update(sender);
    hasher.update(recipient);
    hasher.update(U256::from(start_time).to_be_bytes::<32>());
    if let Some(nonce) = nonce {
        hasher.update(U256::from(nonce).to_be_bytes::<32>());
    }
    hasher.finalize()
}

/// The stream table.
///
/// Each stream sits behind its own mutex, so withdrawals on one stream
/// serialize while different streams proceed in parallel.
pub struct StreamLedger {
    streams: DashMap<StreamId, Arc<Mutex<Stream>>>,
    nonces: DashMap<(Address, Address), u64>,
    custody: Arc<dyn Custody>,
    clock: Arc<dyn Clock>,
    policy: StreamIdPolicy,
}

impl std::fmt::Debug for StreamLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLedger")
            .field("streams", &self.streams.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StreamLedger {
    pub fn new(custody: Arc<dyn Custody>, policy: StreamIdPolicy) -> Self {
        Self::with_clock(custody, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(custody: Arc<dyn Custody>, policy: StreamIdPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            streams: DashMap::new(),
            nonces: DashMap::new(),
            custody,
            clock,
            policy,
        }
    }

    fn next_id(&self, sender: Address, recipient: Address, now: u64) -> StreamId {
        match self.policy {
            StreamIdPolicy::Reject => derive_stream_id(sender, recipient, now, None),
            StreamIdPolicy::Nonce => {
                let mut nonce = self.nonces.entry((sender, recipient)).or_insert(0);
                let id = derive_stream_id(sender, recipient, now, Some(*nonce));
                *nonce += 1;
                id
            }
        }
    }

    fn stream(&self, id: &StreamId) -> LedgerResult<Arc<Mutex<Stream>>> {
        self.streams
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::StreamNotFound(*id))
    }

    /// Open a stream, escrowing `amount` from the sender.
    ///
    /// The record only exists if the escrow succeeded.
    pub fn create_stream(
        &self,
        sender: Address,
        recipient: Address,
        amount: U256,
        duration: u64,
    ) -> LedgerResult<StreamId> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidInput("stream amount must be positive"));
        }
        if duration == 0 {
            return Err(LedgerError::InvalidInput("stream duration must be positive"));
        }
        if sender == recipient {
            return Err(LedgerError::InvalidInput("stream recipient equals sender"));
        }
        if recipient.is_zero() {
            return Err(LedgerError::InvalidInput("stream recipient is the zero address"));
        }

        let now = self.clock.now();
        let end_time = now
            .checked_add(duration)
            .ok_or(LedgerError::InvalidInput("stream duration overflows"))?;
        let id = self.next_id(sender, recipient, now);

        match self.streams.entry(id) {
            Entry::Occupied(_) => Err(LedgerError::StreamExists(id)),
            Entry::Vacant(slot) => {
                self.custody.lock(sender, amount)?;
                slot.insert(Arc::new(Mutex::new(Stream {
                    id,
                    sender,
                    recipient,
                    amount,
                    start_time: now,
                    end_time,
                    withdrawn: U256::ZERO,
                    state: StreamState::Active,
                })));
                info!(%id, %sender, %recipient, %amount, duration, "stream created");
                Ok(id)
            }
        }
    }

    /// Amount withdrawable from a stream right now.
    pub fn available_amount(&self, id: &StreamId) -> LedgerResult<U256> {
        let stream = self.stream(id)?;
        let now = self.clock.now();
        let stream = stream.lock();
        Ok(if stream.is_active() {
            stream.available_at(now)
        } else {
            U256::ZERO
        })
    }

    /// Pay `amount` of the vested balance out to the recipient.
    pub fn withdraw(&self, caller: Address, id: &StreamId, amount: U256) -> LedgerResult<Stream> {
        let stream = self.stream(id)?;
        let now = self.clock.now();
        let mut stream = stream.lock();

        if caller != stream.recipient {
            return Err(LedgerError::Unauthorized {
                caller,
                expected: stream.recipient,
            });
        }
        if !stream.is_active() {
            return Err(LedgerError::StreamNotActive {
                id: *id,
                state: stream.state,
            });
        }
        if amount.is_zero() {
            return Err(LedgerError::InvalidInput("withdrawal amount must be positive"));
        }
        let available = stream.available_at(now);
        if amount > available || amount > stream.remaining() {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available,
            });
        }

        self.custody.release(stream.recipient, amount)?;
        stream.withdrawn += amount;
        if stream.withdrawn == stream.amount {
            stream.state = StreamState::Completed;
        }
        debug!(%id, %amount, withdrawn = %stream.withdrawn, state = %stream.state, "stream withdrawal");
        Ok(stream.clone())
    }

    /// Cancel a stream and refund what has not been withdrawn to the sender.
    ///
    /// Returns the refunded amount.
    pub fn cancel_stream(&self, caller: Address, id: &StreamId) -> LedgerResult<U256> {
        let stream = self.stream(id)?;
        let mut stream = stream.lock();

        if caller != stream.sender {
            return Err(LedgerError::Unauthorized {
                caller,
                expected: stream.sender,
            });
        }
        if !stream.is_active() {
            return Err(LedgerError::StreamNotActive {
                id: *id,
                state: stream.state,
            });
        }

        let refund = stream.remaining();
        self.custody.release(stream.sender, refund)?;
        stream.state = StreamState::Cancelled;
        info!(%id, %refund, "stream cancelled");
        Ok(refund)
    }

    pub fn get(&self, id: &StreamId) -> Option<Stream> {
        let stream = self.streams.get(id).map(|entry| Arc::clone(entry.value()))?;
        let stream = stream.lock().clone();
        Some(stream)
    }

    /// Streams sent or received by `address`, oldest first.
    pub fn list_for(&self, address: Address) -> Vec<Stream> {
        let handles: Vec<_> = self.streams.iter().map(|e| Arc::clone(e.value())).collect();
        let mut streams: Vec<Stream> = handles
            .iter()
            .map(|s| s.lock().clone())
            .filter(|s| s.sender == address || s.recipient == address)
            .collect();
        streams.sort_by_key(|s| (s.start_time, s.id));
        streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
