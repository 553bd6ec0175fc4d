//! The definite-initialization lattice.
//!
//! Each memory element sits at one of three points, with "absent"
//! (`None`) as the bottom of the lattice:
//!
//! ```text
//!           Partial          (top)
//!          /       \
//!        Yes        No
//!          \       /
//!           absent          (bottom)
//! ```

/// Initialization state of a single memory element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiKind {
    No,
    Yes,
    Partial,
}

/// Lattice merge (least upper bound) over two optional kinds.
pub fn merge_kinds(a: Option<DiKind>, b: Option<DiKind>) -> Option<DiKind> {
    let Some(k1) = a else {
        return b;
    };

    // Once partial, nothing can refine the answer.
    if k1 == DiKind::Partial {
        return Some(k1);
    }

    let Some(k2) = b else {
        return Some(k1);
    };

    if k1 != k2 {
        return Some(DiKind::Partial);
    }

    Some(k1)
}

/// Per-element lattice values for one memory object, one slot per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilitySet {
    slots: Vec<Option<DiKind>>,
}

impl AvailabilitySet {
    /// A set with every slot at the lattice bottom.
    pub fn new(num_elements: usize) -> Self {
        Self {
            slots: vec![None; num_elements],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The element's kind; panics while the slot is still unknown.
    pub fn get(&self, elt: usize) -> DiKind {
        self.slots[elt].expect("availability queried before it was computed")
    }

    pub fn get_conditional(&self, elt: usize) -> Option<DiKind> {
        self.slots[elt]
    }

    pub fn set(&mut self, elt: usize, kind: DiKind) {
        self.slots[elt] = Some(kind);
    }

    pub fn set_conditional(&mut self, elt: usize, kind: Option<DiKind>) {
        self.slots[elt] = kind;
    }

    pub fn contains_unknown(&self) -> bool {
        self.slots.iter().any(|slot| slot.is_none())
    }

    pub fn is_all(&self, kind: DiKind) -> bool {
        self.slots.iter().all(|slot| *slot == Some(kind))
    }

    pub fn has_any(&self, kind: DiKind) -> bool {
        self.slots.iter().any(|slot| *slot == Some(kind))
    }

    /// Switches any still-unknown slots to `kind`, leaving known slots
    /// untouched.
    pub fn change_unset_to(&mut self, kind: DiKind) {
        for slot in &mut self.slots {
            if slot.is_none() {
                *slot = Some(kind);
            }
        }
    }

    /// Elementwise lattice merge of `other` into `self`.
    pub fn merge_in(&mut self, other: &AvailabilitySet) {
        debug_assert_eq!(self.len(), other.len());
        for (slot, rhs) in self.slots.iter_mut().zip(&other.slots) {
            *slot = merge_kinds(*slot, *rhs);
        }
    }
}
