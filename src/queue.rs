//! # Queue Channel
//!
//! A fixed-capacity FIFO of fixed-size items, copied in and out by value.
//!
//! A queue does not allocate: its storage is a caller-supplied byte buffer
//! of at least `capacity * item_size` bytes, normally a `static`. The kernel
//! keeps queues in an arena and hands out [`QueueHandle`]s; tasks never hold
//! a reference to the queue itself.
//!
//! This type is the data path only. Blocking, wakeups and timeouts live in
//! the scheduler, which owns every `Queue` and serializes access to it.
//!
//! ```text
//!   try_send(bytes)                             try_receive(out)
//!        │        ┌──────┬──────┬─────┬──────┐        ▲
//!        └──────► │ slot │ slot │ ... │ slot │ ───────┘
//!                 └──────┴──────┴─────┴──────┘
//!                  head ─►              len items from head
//! ```

use core::fmt;

/// Errors reported by queue creation and queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// A queue must hold at least one item.
    ZeroCapacity,
    /// Items must be at least one byte.
    ZeroItemSize,
    /// The backing storage cannot hold `capacity * item_size` bytes.
    InsufficientStorage { required: usize, provided: usize },
    /// The kernel's queue arena is full.
    TooManyQueues,
    /// The handle does not name a created queue.
    InvalidHandle,
    /// The item does not match the queue's item size.
    ItemSize { expected: usize, found: usize },
    /// The item is larger than the kernel's copy buffer.
    ItemTooLarge { size: usize, max: usize },
    /// Every slot holds an unconsumed item.
    Full,
    /// No item is available.
    Empty,
    /// A blocking receive reached its deadline.
    TimedOut,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::ZeroCapacity => f.write_str("queue capacity is zero"),
            QueueError::ZeroItemSize => f.write_str("queue item size is zero"),
            QueueError::InsufficientStorage { required, provided } => write!(
                f,
                "queue storage too small: {} bytes required, {} provided",
                required, provided
            ),
            QueueError::TooManyQueues => f.write_str("queue arena is full"),
            QueueError::InvalidHandle => f.write_str("no such queue"),
            QueueError::ItemSize { expected, found } => {
                write!(f, "item is {} bytes, queue expects {}", found, expected)
            }
            QueueError::ItemTooLarge { size, max } => {
                write!(f, "item is {} bytes, at most {} can be queued", size, max)
            }
            QueueError::Full => f.write_str("queue full"),
            QueueError::Empty => f.write_str("queue empty"),
            QueueError::TimedOut => f.write_str("receive timed out"),
        }
    }
}

/// Identifies a queue in the kernel arena.
///
/// Handles are plain indices, so they are `Copy` and can travel as a task
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHandle(u8);

impl QueueHandle {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u8)
    }

    /// Arena index of this queue.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Encodes the handle as a task parameter.
    pub const fn into_param(self) -> usize {
        self.0 as usize
    }

    /// Decodes a handle previously produced by [`QueueHandle::into_param`].
    pub const fn from_param(param: usize) -> Self {
        Self(param as u8)
    }
}

// ---------------------------------------------------------------------------
// Item encoding
// ---------------------------------------------------------------------------

/// A value that can travel through a queue as a fixed-size byte image.
pub trait Item: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Writes the value into `out`, which is exactly `SIZE` bytes long.
    fn encode(self, out: &mut [u8]);

    /// Reads a value back from exactly `SIZE` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_item_for_int {
    ($($t:ty),*) => {
        $(
            impl Item for $t {
                const SIZE: usize = core::mem::size_of::<$t>();

                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_item_for_int!(u8, u16, u32);

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A bounded FIFO over borrowed storage.
pub struct Queue<'s> {
    storage: &'s mut [u8],
    item_size: usize,
    capacity: usize,
    /// Slot holding the oldest item.
    head: usize,
    /// Number of items queued.
    len: usize,
}

impl fmt::Debug for Queue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("item_size", &self.item_size)
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish()
    }
}

impl<'s> Queue<'s> {
    /// Creates an empty queue of `capacity` items of `item_size` bytes each.
    ///
    /// Any storage beyond `capacity * item_size` bytes is left unused.
    pub fn new(
        capacity: usize,
        item_size: usize,
        storage: &'s mut [u8],
    ) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        if item_size == 0 {
            return Err(QueueError::ZeroItemSize);
        }
        let required = capacity
            .checked_mul(item_size)
            .ok_or(QueueError::InsufficientStorage {
                required: usize::MAX,
                provided: storage.len(),
            })?;
        if storage.len() < required {
            return Err(QueueError::InsufficientStorage {
                required,
                provided: storage.len(),
            });
        }

        Ok(Self {
            storage,
            item_size,
            capacity,
            head: 0,
            len: 0,
        })
    }

    /// Size of one item in bytes.
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    fn slot(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.item_size;
        &mut self.storage[start..start + self.item_size]
    }

    fn check_size(&self, len: usize) -> Result<(), QueueError> {
        if len == self.item_size {
            Ok(())
        } else {
            Err(QueueError::ItemSize {
                expected: self.item_size,
                found: len,
            })
        }
    }

    /// Copies `item` into the tail slot. Never blocks.
    ///
    /// Returns `Err(QueueError::Full)` without touching the queue when every
    /// slot is occupied.
    pub fn try_send(&mut self, item: &[u8]) -> Result<(), QueueError> {
        self.check_size(item.len())?;
        if self.is_full() {
            return Err(QueueError::Full);
        }

        let tail = (self.head + self.len) % self.capacity;
        self.slot(tail).copy_from_slice(item);
        self.len += 1;
        Ok(())
    }

    /// Copies the oldest item into `out` and frees its slot. Never blocks.
    pub fn try_receive(&mut self, out: &mut [u8]) -> Result<(), QueueError> {
        self.check_size(out.len())?;
        if self.is_empty() {
            return Err(QueueError::Empty);
        }

        let head = self.head;
        out.copy_from_slice(self.slot(head));
        self.head = if head + 1 == self.capacity { 0 } else { head + 1 };
        self.len -= 1;
        Ok(())
    }
}
