use super::types::{Binding, InputSlot};
use super::MappingError;
use std::collections::HashMap;
use tracing::warn;

/// A duplicate binding that was dropped while building a [`Mapping`]
#[derive(Clone, Debug, PartialEq)]
pub struct BindingConflict {
    pub slot: InputSlot,
    pub discarded: Binding,
    pub kept: Binding,
}

/// Ordered binding table of one device
///
/// Holds at most one binding per [`InputSlot`]. Once handed to a JoyPad a
/// Mapping is shared immutably; edits build a new one.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    bindings: Vec<Binding>,
    index: HashMap<InputSlot, usize>,
}

impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.bindings == other.bindings
    }
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from declared bindings
    ///
    /// Invalid bindings fail the whole table. Duplicates keep the last
    /// declaration at the position of the first and are reported.
    pub fn from_bindings(
        bindings: impl IntoIterator<Item = Binding>,
    ) -> Result<(Self, Vec<BindingConflict>), MappingError> {
        let mut mapping = Mapping::new();
        let mut conflicts = Vec::new();

        for binding in bindings {
            binding.validate()?;
            if let Some(previous) = mapping.insert(binding) {
                warn!(
                    "Duplicate binding for {}, keeping the later one",
                    binding.source.slot()
                );
                conflicts.push(BindingConflict {
                    slot: binding.source.slot(),
                    discarded: previous,
                    kept: binding,
                });
            }
        }

        Ok((mapping, conflicts))
    }

    /// Adds or replaces the binding for its slot, returning the old one
    pub fn bind(&mut self, binding: Binding) -> Result<Option<Binding>, MappingError> {
        binding.validate()?;
        Ok(self.insert(binding))
    }

    pub fn unbind(&mut self, slot: InputSlot) -> Option<Binding> {
        let position = self.index.remove(&slot)?;
        let removed = self.bindings.remove(position);
        for entry in self.index.values_mut() {
            if *entry > position {
                *entry -= 1;
            }
        }
        Some(removed)
    }

    pub fn get(&self, slot: InputSlot) -> Option<&Binding> {
        self.index.get(&slot).map(|i| &self.bindings[*i])
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn insert(&mut self, binding: Binding) -> Option<Binding> {
        let slot = binding.source.slot();
        match self.index.get(&slot) {
            Some(&position) => Some(std::mem::replace(&mut self.bindings[position], binding)),
            None => {
                self.index.insert(slot, self.bindings.len());
                self.bindings.push(binding);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{LogicalInput, OutputAction};

    fn key(index: u16, code: u16) -> Binding {
        Binding::new(LogicalInput::Button { index }, OutputAction::Key { code })
    }

    #[test]
    fn duplicates_keep_last_and_report() {
        let (mapping, conflicts) =
            Mapping::from_bindings([key(0, 30), key(1, 31), key(0, 32)]).unwrap();

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.bindings()[0], key(0, 32));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].slot, InputSlot::Button(0));
        assert_eq!(conflicts[0].discarded, key(0, 30));
    }

    #[test]
    fn invalid_binding_fails_table() {
        let bad = Binding::new(
            LogicalInput::AxisAnalog { index: 0 },
            OutputAction::Key { code: 1 },
        );
        assert!(Mapping::from_bindings([key(0, 30), bad]).is_err());
    }

    #[test]
    fn unbind_keeps_lookup_consistent() {
        let (mut mapping, _) = Mapping::from_bindings([key(0, 30), key(1, 31), key(2, 32)]).unwrap();
        assert_eq!(mapping.unbind(InputSlot::Button(0)), Some(key(0, 30)));
        assert_eq!(mapping.get(InputSlot::Button(2)), Some(&key(2, 32)));
        assert_eq!(mapping.get(InputSlot::Button(1)), Some(&key(1, 31)));
        assert!(mapping.get(InputSlot::Button(0)).is_none());
    }

    #[test]
    fn bind_replaces_in_place() {
        let mut mapping = Mapping::new();
        mapping.bind(key(3, 30)).unwrap();
        mapping.bind(key(4, 31)).unwrap();
        let old = mapping.bind(key(3, 40)).unwrap();
        assert_eq!(old, Some(key(3, 30)));
        assert_eq!(mapping.bindings(), &[key(3, 40), key(4, 31)]);
    }
}
