use std::marker::PhantomData;

use sprig_core::{ArenaIndex, BodyId, ContactId, JointId};

/// Bodies, contacts and joints that have to be solved together
#[derive(Debug, Default, Clone)]
pub(crate) struct Island {
    pub bodies: Vec<BodyId>,
    pub contacts: Vec<ContactId>,
    pub joints: Vec<JointId>,
}

impl Island {
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.contacts.clear();
        self.joints.clear();
    }
}

/// Per slot membership flags, reset before each use
#[derive(Debug, Clone)]
pub(crate) struct Marks<I> {
    bits: Vec<bool>,
    _marker: PhantomData<fn(I) -> I>,
}

impl<I> Default for Marks<I> {
    fn default() -> Self {
        Self {
            bits: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<I: ArenaIndex> Marks<I> {
    /// Clears every mark and sizes the set for `len` slots
    pub fn reset(&mut self, len: usize) {
        self.bits.clear();
        self.bits.resize(len, false);
    }

    #[inline]
    pub fn get(&self, id: I) -> bool {
        self.bits.get(id.index()).copied().unwrap_or(false)
    }

    /// Marks `id`, growing the set for slots allocated after the last reset
    pub fn set(&mut self, id: I) {
        let index = id.index();
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }

        self.bits[index] = true;
    }

    pub fn unset(&mut self, id: I) {
        if let Some(bit) = self.bits.get_mut(id.index()) {
            *bit = false;
        }
    }
}

/// Island membership of every entity kind
#[derive(Debug, Default, Clone)]
pub(crate) struct IslandMarks {
    pub bodies: Marks<BodyId>,
    pub contacts: Marks<ContactId>,
    pub joints: Marks<JointId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_grow() {
        let mut marks = Marks::<ContactId>::default();
        marks.reset(2);

        let far = ContactId::from_index(10);
        assert!(!marks.get(far));
        marks.set(far);
        assert!(marks.get(far));

        marks.unset(far);
        assert!(!marks.get(far));

        marks.set(ContactId::from_index(1));
        marks.reset(4);
        assert!(!marks.get(ContactId::from_index(1)));
    }
}
