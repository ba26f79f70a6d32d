//! Field identity and the texture-unit namespace.
use std::fmt;

use tracing::debug;

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};

/// Process-unique identity of a field.
///
/// The ordinal doubles as the texture unit the field's texture is bound to and as the
/// suffix of every shader symbol the field contributes. Ordinals come only from an
/// [`OrdinalAllocator`], so two fields built from one allocator never share one:
///
/// ```compile_fail
/// let _ = field_synth::field::Ordinal(3);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ordinal(pub(crate) u32);

impl Ordinal {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn texture_unit(self) -> u32 {
        self.0
    }

    /// `base` with this ordinal appended, e.g. `rgba3`.
    pub fn suffix(self, base: &str) -> String {
        format!("{}{}", base, self.0)
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out ordinals from a monotonic counter bounded by the texture-unit count.
///
/// Ordinals are never reclaimed. Once `capacity` ordinals have been handed out every
/// further request fails with [`Error::OrdinalsExhausted`].
#[derive(Clone, Debug)]
pub struct OrdinalAllocator {
    next: u32,
    capacity: u32,
}

impl OrdinalAllocator {
    pub fn new(capacity: u32) -> Self {
        Self { next: 0, capacity }
    }

    pub fn from_capabilities(capabilities: &Capabilities) -> Self {
        Self::new(capabilities.max_texture_units)
    }

    /// Claims the next ordinal.
    pub fn allocate(&mut self) -> Result<Ordinal> {
        if self.next >= self.capacity {
            return Err(Error::OrdinalsExhausted {
                capacity: self.capacity,
            });
        }
        let ordinal = Ordinal(self.next);
        self.next += 1;
        debug!("Allocated field ordinal {}", ordinal);
        Ok(ordinal)
    }

    pub fn allocated(&self) -> u32 {
        self.next
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.next
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
