//! ID types and the `+8` allocation discipline shared by Terminal and
//! Operation IDs (spec.md §3, invariants 1-3).
//!
//! Segment headers pack a 2-bit message type into the low bits of the ID
//! (`(id & !3) | type`), so every ID handed out by an [`IdAllocator`] must
//! already have its low two bits clear. Stepping by 8 keeps a full byte of
//! headroom below that for future wire extensions, and fixes the residue
//! class (`0 mod 8` vs `4 mod 8`) so that IDs independently allocated by the
//! two ends of a Terminal or Crane can never collide — the dialer/"local"
//! side owns one residue class, the listener/"remote" side the other.

use core::sync::atomic::{AtomicU32, Ordering};

/// Six-hex-char Crane identifier, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CraneId([u8; 3]);

impl CraneId {
    /// Generate a fresh random Crane ID. Collisions are not checked here;
    /// callers that need global uniqueness (e.g. a Hub directory) must
    /// still dedupe against their live Crane map.
    pub fn random() -> Self {
        let bytes: [u8; 3] = rand::random();
        Self(bytes)
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        self.0
    }
}

impl core::fmt::Display for CraneId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// Which residue class (spec.md: "even on dialer, odd on listener") an
/// allocator hands out IDs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorRole {
    /// The side that dialed the Crane, or that locally started a Terminal
    /// / Operation. Starting ID is 0 (`id / 4` is even).
    Dialer,
    /// The side that accepted the connection, or on whose behalf a remote
    /// peer started a Terminal / Operation. Starting ID is 4 (`id / 4` is
    /// odd).
    Listener,
}

impl AllocatorRole {
    fn base(self) -> u32 {
        match self {
            AllocatorRole::Dialer => 0,
            AllocatorRole::Listener => 4,
        }
    }
}

const ID_STEP: u32 = 8;

/// A monotonically increasing 32-bit ID source, stepping by 8 and never
/// reusing a value for the lifetime of the owning Crane/Terminal (spec.md
/// invariants 1-2).
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new(role: AllocatorRole) -> Self {
        Self {
            next: AtomicU32::new(role.base()),
        }
    }

    /// Allocate the next ID in the sequence. Wrapping is a logic error in
    /// any realistic deployment (it would require ~500M IDs from one side
    /// of one Terminal/Crane) and is treated as one here via wrapping add,
    /// matching spec.md's silence on overflow: IDs are "never reused" only
    /// as an operational invariant, not a hard wire guarantee.
    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(ID_STEP, Ordering::AcqRel)
    }
}
