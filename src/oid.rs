//! Object identifier type.
//!
//! An OID is an ordered sequence of unsigned 32-bit sub-identifiers, at most
//! [`MAX_OID_LEN`] long. The empty OID is permitted as the "no name" sentinel
//! used by unbounded search ranges; it can be constructed but never parsed.

use std::str::FromStr;

use smallvec::SmallVec;

use crate::error::{Error, OidErrorKind, Result};

/// Maximum number of sub-identifiers in an OID (RFC 2741 section 5.1).
pub const MAX_OID_LEN: usize = 128;

/// Construct an [`Oid`] from literal sub-identifiers.
///
/// ```rust
/// use async_agentx::{Oid, oid};
///
/// let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
/// assert_eq!(sys_descr.to_string(), "1.3.6.1.2.1.1.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($arc:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc),*])
    };
}

/// An object identifier.
///
/// Stores sub-identifiers inline for typical MIB depths; ordering is
/// lexicographic over unsigned arcs, with a strict prefix sorting before
/// its extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Oid {
    arcs: SmallVec<[u32; 12]>,
}

impl Oid {
    /// The empty OID ("no name" sentinel).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create from a slice of sub-identifiers.
    ///
    /// Panics in debug builds if the slice exceeds [`MAX_OID_LEN`]; wire and
    /// string inputs go through checked constructors instead.
    pub fn from_slice(arcs: &[u32]) -> Self {
        debug_assert!(arcs.len() <= MAX_OID_LEN);
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Create from a vector of sub-identifiers, validating the length.
    pub fn from_arcs(arcs: impl IntoIterator<Item = u32>) -> Result<Self> {
        let arcs: SmallVec<[u32; 12]> = arcs.into_iter().collect();
        if arcs.len() > MAX_OID_LEN {
            return Err(Error::invalid_oid(OidErrorKind::TooLong {
                count: arcs.len(),
                max: MAX_OID_LEN,
            }));
        }
        Ok(Self { arcs })
    }

    /// Parse a dotted-decimal string.
    ///
    /// Rejects empty input, empty components, leading zeros beyond a lone
    /// `0`, arcs above 2^32 - 1, and more than [`MAX_OID_LEN`] arcs.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::invalid_oid_with_input(OidErrorKind::Empty, s));
        }

        let mut arcs: SmallVec<[u32; 12]> = SmallVec::new();
        for component in s.split('.') {
            if component.is_empty() {
                return Err(Error::invalid_oid_with_input(OidErrorKind::EmptyComponent, s));
            }
            if component.len() > 1 && component.starts_with('0') {
                return Err(Error::invalid_oid_with_input(OidErrorKind::LeadingZero, s));
            }
            if !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::invalid_oid_with_input(OidErrorKind::InvalidCharacter, s));
            }
            let arc: u32 = component
                .parse()
                .map_err(|_| Error::invalid_oid_with_input(OidErrorKind::ArcOverflow, s))?;
            arcs.push(arc);
        }

        if arcs.len() > MAX_OID_LEN {
            return Err(Error::invalid_oid_with_input(
                OidErrorKind::TooLong {
                    count: arcs.len(),
                    max: MAX_OID_LEN,
                },
                s,
            ));
        }

        Ok(Self { arcs })
    }

    /// The sub-identifiers as a slice.
    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// Number of sub-identifiers.
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// True for the "no name" sentinel.
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// True when `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Oid) -> bool {
        self.arcs.len() <= other.arcs.len() && other.arcs[..self.arcs.len()] == self.arcs[..]
    }

    /// True when `self` begins with `prefix`.
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        prefix.is_prefix_of(self)
    }

    /// The OID with the final sub-identifier removed, or `None` at the root.
    pub fn parent(&self) -> Option<Oid> {
        if self.arcs.is_empty() {
            return None;
        }
        Some(Self {
            arcs: SmallVec::from_slice(&self.arcs[..self.arcs.len() - 1]),
        })
    }

    /// Extend with a suffix, validating the combined length.
    pub fn child(&self, suffix: &Oid) -> Result<Oid> {
        let count = self.arcs.len() + suffix.arcs.len();
        if count > MAX_OID_LEN {
            return Err(Error::invalid_oid(OidErrorKind::TooLong {
                count,
                max: MAX_OID_LEN,
            }));
        }
        let mut arcs = self.arcs.clone();
        arcs.extend_from_slice(&suffix.arcs);
        Ok(Self { arcs })
    }

    /// Append a single sub-identifier.
    pub fn push(&mut self, arc: u32) {
        self.arcs.push(arc);
    }

    /// The suffix of `self` below `prefix`, or `None` when `prefix` does not apply.
    pub fn strip_prefix(&self, prefix: &Oid) -> Option<Oid> {
        if !prefix.is_prefix_of(self) {
            return None;
        }
        Some(Self {
            arcs: SmallVec::from_slice(&self.arcs[prefix.arcs.len()..]),
        })
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Component-wise unsigned comparison; a strict prefix sorts first.
        self.arcs.cmp(&other.arcs)
    }
}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for arc in &self.arcs {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}
