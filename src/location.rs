//! Feature location model
//!
//! Coordinates are 1-based and inclusive on both ends. A feature extent is a
//! CompoundLocation: an ordered list of Location segments plus a group-level
//! complement flag. Reverse-strand features can be represented in "outer"
//! form (group flag set, members plain) or "inner" form (members individually
//! complemented); `push` reconciles the two when segments of mixed
//! orientation are merged into one compound.

/// One contiguous coordinate range of a feature.
///
/// Partiality flags are stored in the segment's own frame: with `complement`
/// unset, `five_prime_partial` marks the lower coordinate and
/// `three_prime_partial` the upper one; with `complement` set the two trade
/// places. `toggle_complement` keeps the denoted ends stable across frame
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub start: u64,
    pub end: u64,
    pub complement: bool,
    pub five_prime_partial: bool,
    pub three_prime_partial: bool,
}

impl Location {
    pub fn new(start: u64, end: u64) -> Self {
        Location {
            start,
            end,
            complement: false,
            five_prime_partial: false,
            three_prime_partial: false,
        }
    }

    /// True if the lower-coordinate end of the segment is truncated.
    pub fn lower_partial(&self) -> bool {
        if self.complement {
            self.three_prime_partial
        } else {
            self.five_prime_partial
        }
    }

    /// True if the upper-coordinate end of the segment is truncated.
    pub fn upper_partial(&self) -> bool {
        if self.complement {
            self.five_prime_partial
        } else {
            self.three_prime_partial
        }
    }

    pub fn set_lower_partial(&mut self, partial: bool) {
        if self.complement {
            self.three_prime_partial = partial;
        } else {
            self.five_prime_partial = partial;
        }
    }

    pub fn set_upper_partial(&mut self, partial: bool) {
        if self.complement {
            self.five_prime_partial = partial;
        } else {
            self.three_prime_partial = partial;
        }
    }

    /// Flips the complement flag and swaps the partiality flags so the
    /// truncated coordinate ends stay the same.
    pub fn toggle_complement(&mut self) {
        self.complement = !self.complement;
        std::mem::swap(
            &mut self.five_prime_partial,
            &mut self.three_prime_partial,
        );
    }
}

/// Ordered list of segments with a shared complement flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundLocation {
    pub complement: bool,
    pub segments: Vec<Location>,
}

impl CompoundLocation {
    pub fn new() -> Self {
        CompoundLocation::default()
    }

    pub fn from_location(location: Location) -> Self {
        let mut compound = CompoundLocation::new();
        compound.push(location);
        compound
    }

    /// Appends a segment, reconciling complement representation.
    ///
    /// A complemented first segment puts the compound into outer form (group
    /// flag set, member stored plain). Pushing a plain segment into an outer
    /// compound restructures every existing member to inner form first, so
    /// one compound never mixes a group flag with forward members.
    pub fn push(&mut self, mut location: Location) {
        if self.segments.is_empty() {
            if location.complement {
                location.toggle_complement();
                self.complement = true;
            }
            self.segments.push(location);
            return;
        }
        if self.complement {
            if location.complement {
                // Same orientation: absorb the member flag into the group flag.
                location.toggle_complement();
            } else {
                // Mixed orientation: move the group flag onto each member.
                for segment in &mut self.segments {
                    segment.toggle_complement();
                }
                self.complement = false;
            }
        }
        self.segments.push(location);
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Lowest coordinate covered by any segment.
    pub fn span_start(&self) -> u64 {
        self.segments.iter().map(|s| s.start).min().unwrap_or(0)
    }

    /// Highest coordinate covered by any segment.
    pub fn span_end(&self) -> u64 {
        self.segments.iter().map(|s| s.end).max().unwrap_or(0)
    }

    /// Whole-compound orientation, tolerating inner-form representation.
    pub fn is_reverse(&self) -> bool {
        self.complement
            || (!self.segments.is_empty() && self.segments.iter().all(|s| s.complement))
    }

    /// True if the segment holding the lowest coordinate is truncated there.
    pub fn start_partial(&self) -> bool {
        self.segments
            .iter()
            .min_by_key(|s| s.start)
            .map(|s| s.lower_partial())
            .unwrap_or(false)
    }

    /// True if the segment holding the highest coordinate is truncated there.
    pub fn end_partial(&self) -> bool {
        self.segments
            .iter()
            .max_by_key(|s| s.end)
            .map(|s| s.upper_partial())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complemented(start: u64, end: u64) -> Location {
        let mut loc = Location::new(start, end);
        loc.complement = true;
        loc
    }

    #[test]
    fn first_complemented_segment_sets_group_flag() {
        let compound = CompoundLocation::from_location(complemented(10, 50));
        assert!(compound.complement);
        assert_eq!(compound.segments.len(), 1);
        assert!(!compound.segments[0].complement);
    }

    #[test]
    fn plain_segment_into_complemented_compound_restructures() {
        let mut first = complemented(100, 200);
        first.set_lower_partial(true);
        let mut compound = CompoundLocation::from_location(first);
        assert!(compound.complement);
        let stored = compound.segments[0];
        assert!(stored.five_prime_partial);
        assert!(!stored.three_prime_partial);

        compound.push(Location::new(300, 400));

        assert!(!compound.complement);
        assert_eq!(compound.segments.len(), 2);
        let restructured = compound.segments[0];
        assert!(restructured.complement);
        // Flags swapped with the frame change; the truncated end is unmoved.
        assert!(!restructured.five_prime_partial);
        assert!(restructured.three_prime_partial);
        assert!(restructured.lower_partial());
        assert!(!compound.segments[1].complement);
    }

    #[test]
    fn same_orientation_appends_without_restructuring() {
        let mut compound = CompoundLocation::from_location(complemented(100, 200));
        compound.push(complemented(300, 400));
        assert!(compound.complement);
        assert!(compound.segments.iter().all(|s| !s.complement));
        assert_eq!(compound.segments.len(), 2);
    }

    #[test]
    fn complemented_segment_into_plain_compound_keeps_member_flag() {
        let mut compound = CompoundLocation::from_location(Location::new(1, 10));
        compound.push(complemented(20, 30));
        assert!(!compound.complement);
        assert!(!compound.segments[0].complement);
        assert!(compound.segments[1].complement);
    }

    #[test]
    fn span_covers_all_segments() {
        let mut compound = CompoundLocation::from_location(Location::new(50, 80));
        compound.push(Location::new(10, 20));
        compound.push(Location::new(100, 120));
        assert_eq!(compound.span_start(), 10);
        assert_eq!(compound.span_end(), 120);
    }

    #[test]
    fn partial_accessors_follow_the_segment_frame() {
        let mut loc = Location::new(1, 206);
        loc.set_lower_partial(true);
        assert!(loc.five_prime_partial);
        loc.toggle_complement();
        assert!(loc.lower_partial());
        assert!(loc.three_prime_partial);
        assert!(!loc.five_prime_partial);
    }

    #[test]
    fn inner_form_reads_as_reverse() {
        let compound = CompoundLocation {
            complement: false,
            segments: vec![complemented(1, 10), complemented(20, 30)],
        };
        assert!(compound.is_reverse());
    }
}
