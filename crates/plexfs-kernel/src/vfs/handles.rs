//! Handle table.
//!
//! A growable slot array indexed by a handle's `local_id`. Allocation takes
//! the first empty slot before appending, so ids are reused but never
//! shared by two live handles.

/// Slot table mapping `local_id` to per-handle state.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Store `value` in the first free slot and return its id.
    pub fn allocate(&mut self, value: T) -> u32 {
        if let Some(id) = self.slots.iter().position(Option::is_none) {
            self.slots[id] = Some(value);
            return id as u32;
        }
        self.slots.push(Some(value));
        (self.slots.len() - 1) as u32
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Empty the slot. Releasing an empty or unknown slot returns `None`.
    pub fn release(&mut self, id: u32) -> Option<T> {
        self.slots.get_mut(id as usize).and_then(Option::take)
    }

    /// Number of live handles.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of slots ever allocated, live or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live() == 0
    }

    /// Iterate live `(id, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i as u32, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (i as u32, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_appends() {
        let mut table = HandleTable::new();
        assert_eq!(table.allocate('a'), 0);
        assert_eq!(table.allocate('b'), 1);
        assert_eq!(table.get(1), Some(&'b'));
        assert_eq!(table.live(), 2);
    }

    #[test]
    fn test_first_free_slot_is_reused() {
        let mut table = HandleTable::new();
        for c in ['a', 'b', 'c'] {
            table.allocate(c);
        }
        assert_eq!(table.release(1), Some('b'));
        assert_eq!(table.allocate('d'), 1);
        assert_eq!(table.allocate('e'), 3);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_double_release() {
        let mut table = HandleTable::new();
        let id = table.allocate(7);
        assert_eq!(table.release(id), Some(7));
        assert_eq!(table.release(id), None);
        assert_eq!(table.release(99), None);
        assert!(table.get(id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_iter_skips_released() {
        let mut table = HandleTable::new();
        table.allocate(1);
        let mid = table.allocate(2);
        table.allocate(3);
        table.release(mid);
        let live: Vec<_> = table.iter().map(|(id, v)| (id, *v)).collect();
        assert_eq!(live, vec![(0, 1), (2, 3)]);
    }
}
