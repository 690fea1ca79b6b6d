//! Fatal invariant checks
//!
//! Nothing in this crate returns an error for a bad descriptor, location or
//! width: a wrong answer here addresses the wrong physical register, so every
//! precondition violation ends up in [`violated`], which logs and panics.
//! Recoverable failures (opening devices, parsing input) belong to the access
//! layer's `Result` types and never pass through here. A register access on
//! a backend that was opened successfully is assumed to complete; if it
//! does not, that is reported here as [`Invariant::Access`].
//!
//! The checks are not debug assertions; they are compiled into every profile.

use core::fmt;

/// Which invariant was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invariant {
    /// Descriptor unit tag does not match the family or block being used
    UnitMismatch,
    /// Register instance, unit number or sub-unit number out of range
    OutOfRange,
    /// Synthesized offset touches bits reserved for unit/instance selection
    ApertureOverlap,
    /// Access width not one of 1, 2, 4 or 8 bytes
    InvalidWidth,
    /// Address not naturally aligned to its access width
    Misaligned,
    /// Data fabric revision unknown or register absent on this revision
    FabricRevision,
    /// Block unmapped or accessed through the wrong provenance path
    Provenance,
    /// Boot phase transition repeated or physical window malformed
    MappingState,
    /// An already-opened config space, port or mapping backend failed
    Access,
}

impl Invariant {
    pub fn name(&self) -> &'static str {
        match self {
            Invariant::UnitMismatch => "unit-mismatch",
            Invariant::OutOfRange => "out-of-range",
            Invariant::ApertureOverlap => "aperture-overlap",
            Invariant::InvalidWidth => "invalid-width",
            Invariant::Misaligned => "misaligned",
            Invariant::FabricRevision => "fabric-revision",
            Invariant::Provenance => "provenance",
            Invariant::MappingState => "mapping-state",
            Invariant::Access => "access-failed",
        }
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Report a violated invariant and halt.
///
/// The panic message always has the form
/// `invariant violated [<kind>]: <detail>`, which tests match on.
#[cold]
#[inline(never)]
#[track_caller]
pub fn violated(kind: Invariant, detail: fmt::Arguments<'_>) -> ! {
    let location = core::panic::Location::caller();
    tracing::error!(
        invariant = kind.name(),
        file = location.file(),
        line = location.line(),
        "{}",
        detail
    );
    panic!("invariant violated [{kind}]: {detail}");
}

/// Check a condition and route a failure through [`violated`].
///
/// ```
/// use zenreg_raw::invariant;
/// use zenreg_raw::invariant::Invariant;
///
/// let instance = 1u32;
/// invariant!(instance < 4, Invariant::OutOfRange, "instance {} >= 4", instance);
/// ```
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $kind:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::invariant::violated($kind, format_args!($($arg)+));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_names_are_distinct() {
        let all = [
            Invariant::UnitMismatch,
            Invariant::OutOfRange,
            Invariant::ApertureOverlap,
            Invariant::InvalidWidth,
            Invariant::Misaligned,
            Invariant::FabricRevision,
            Invariant::Provenance,
            Invariant::MappingState,
            Invariant::Access,
        ];
        let mut names: Vec<_> = all.iter().map(|i| i.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn test_invariant_holds() {
        invariant!(1 + 1 == 2, Invariant::OutOfRange, "arithmetic broke");
    }

    #[test]
    #[should_panic(expected = "invariant violated [out-of-range]: instance 7 >= 4")]
    fn test_invariant_violation_panics_with_kind() {
        let instance = 7;
        invariant!(instance < 4, Invariant::OutOfRange, "instance {} >= 4", instance);
    }
}
