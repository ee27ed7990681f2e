use std::collections::HashMap;

/// Bijection between a real kernel-assigned value domain and a dense virtual
/// domain presented to the tracee. Fresh virtual values are handed out from a
/// monotone counter; erased pairs never get their virtual value back, so a
/// recycled kernel inode number cannot alias an earlier sighting.
pub struct ValueMapper {
    name: &'static str,
    real_to_virtual: HashMap<u64, u64>,
    virtual_to_real: HashMap<u64, u64>,
    fresh_virtual: u64,
}

impl ValueMapper {
    pub fn new(name: &'static str, first_virtual: u64) -> ValueMapper {
        ValueMapper {
            name,
            real_to_virtual: HashMap::new(),
            virtual_to_real: HashMap::new(),
            fresh_virtual: first_virtual,
        }
    }

    /// Virtual value for `real`, assigning the next fresh one on first
    /// sighting.
    pub fn add_real(&mut self, real: u64) -> u64 {
        if let Some(virt) = self.real_to_virtual.get(&real) {
            return *virt;
        }
        let virt = self.fresh_virtual;
        self.fresh_virtual += 1;
        log::trace!("{}: {} -> {}", self.name, real, virt);
        self.real_to_virtual.insert(real, virt);
        self.virtual_to_real.insert(virt, real);
        virt
    }

    /// Record a pair with a caller-chosen virtual value (used for mtimes,
    /// whose virtual values come from the logical clock rather than the
    /// counter). The caller must not have mapped `real` yet.
    pub fn insert_pair(&mut self, real: u64, virt: u64) {
        log::trace!("{}: {} -> {} (explicit)", self.name, real, virt);
        self.real_to_virtual.insert(real, virt);
        self.virtual_to_real.insert(virt, real);
    }

    pub fn get_virtual(&self, real: u64) -> Option<u64> {
        self.real_to_virtual.get(&real).copied()
    }

    pub fn get_real(&self, virt: u64) -> Option<u64> {
        self.virtual_to_real.get(&virt).copied()
    }

    pub fn has_real(&self, real: u64) -> bool {
        self.real_to_virtual.contains_key(&real)
    }

    pub fn has_virtual(&self, virt: u64) -> bool {
        self.virtual_to_real.contains_key(&virt)
    }

    /// Drop both directions of the pair keyed by `real`. Returns whether the
    /// pair existed. The virtual value is retired, not recycled.
    pub fn erase_real(&mut self, real: u64) -> bool {
        match self.real_to_virtual.remove(&real) {
            Some(virt) => {
                // Colliding explicit values may have repointed the reverse
                // entry; only remove it if it still belongs to us.
                if self.virtual_to_real.get(&virt) == Some(&real) {
                    self.virtual_to_real.remove(&virt);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_dense_monotone_virtual_values() {
        let mut m = ValueMapper::new("inode", 1);
        assert_eq!(m.add_real(5000), 1);
        assert_eq!(m.add_real(17), 2);
        assert_eq!(m.add_real(99999), 3);
        // stable on re-sighting
        assert_eq!(m.add_real(17), 2);
    }

    #[test]
    fn is_a_bijection() {
        let mut m = ValueMapper::new("inode", 1);
        for real in &[77u64, 4242, 1, 900] {
            let virt = m.add_real(*real);
            assert_eq!(m.get_real(virt), Some(*real));
            assert_eq!(m.get_virtual(*real), Some(virt));
        }
    }

    #[test]
    fn absent_keys_yield_none() {
        let m = ValueMapper::new("inode", 1);
        assert_eq!(m.get_virtual(1), None);
        assert_eq!(m.get_real(1), None);
        assert!(!m.has_real(1));
        assert!(!m.has_virtual(1));
    }

    #[test]
    fn erasure_removes_both_directions_and_never_recycles() {
        let mut m = ValueMapper::new("inode", 1);
        let virt = m.add_real(123);
        assert_eq!(virt, 1);
        assert!(m.erase_real(123));
        assert_eq!(m.get_virtual(123), None);
        assert_eq!(m.get_real(virt), None);
        assert!(!m.erase_real(123));
        // the same kernel inode number comes back: it must look like a new file
        assert_eq!(m.add_real(123), 2);
    }

    #[test]
    fn explicit_pairs_coexist_with_counter_pairs() {
        let mut m = ValueMapper::new("mtime", 0);
        m.insert_pair(10, 744847200);
        m.insert_pair(11, 744847200);
        assert_eq!(m.get_virtual(10), Some(744847200));
        assert_eq!(m.get_virtual(11), Some(744847200));
        assert!(m.erase_real(10));
        assert_eq!(m.get_virtual(11), Some(744847200));
    }
}
