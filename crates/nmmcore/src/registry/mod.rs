//! Load order and enable intent for installed mods.
//!
//! Lower `order` applies first; the highest `order` wins a conflicting
//! path. After every mutation the orders are exactly `0..n-1`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One registry row, persisted in the `mods` list of the app config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModConfigItem {
    pub name: String,
    pub order: usize,
    /// User intent: should this mod be applied
    pub enabled: bool,
}

/// Ordered, enable-flagged list of installed mods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedRegistry {
    /// Kept sorted by `order`
    items: Vec<ModConfigItem>,
}

impl OrderedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted rows, sorting by `(order, name)` and compacting.
    ///
    /// Older configs used 1-based orders with gaps; duplicates keep the
    /// first row.
    pub fn from_items(mut items: Vec<ModConfigItem>) -> Self {
        items.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

        let mut seen = std::collections::HashSet::new();
        items.retain(|item| {
            let fresh = seen.insert(item.name.clone());
            if !fresh {
                tracing::warn!("Dropping duplicate load order entry {:?}", item.name);
            }
            fresh
        });

        let mut registry = OrderedRegistry { items };
        registry.renumber();
        registry
    }

    /// Track a new mod at the end of the load order, disabled.
    pub fn append(&mut self, name: &str) -> Result<&ModConfigItem> {
        if self.position(name).is_some() {
            return Err(Error::DuplicateModName(name.to_string()));
        }
        let order = self.items.len();
        self.items.push(ModConfigItem {
            name: name.to_string(),
            order,
            enabled: false,
        });
        Ok(&self.items[order])
    }

    /// Stop tracking a mod; later mods move down by one.
    pub fn remove(&mut self, name: &str) -> Result<ModConfigItem> {
        let idx = self.require(name)?;
        let removed = self.items.remove(idx);
        self.renumber();
        Ok(removed)
    }

    /// Flip enable intent. Order is untouched.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let idx = self.require(name)?;
        self.items[idx].enabled = enabled;
        Ok(())
    }

    /// Move a mod to `new_position` (0-based), shifting the mods in between.
    pub fn reorder(&mut self, name: &str, new_position: usize) -> Result<()> {
        let idx = self.require(name)?;
        if new_position >= self.items.len() {
            return Err(Error::InvalidPosition {
                position: new_position,
                len: self.items.len(),
            });
        }
        let item = self.items.remove(idx);
        self.items.insert(new_position, item);
        self.renumber();
        Ok(())
    }

    /// Rows in load order.
    pub fn items(&self) -> &[ModConfigItem] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&ModConfigItem> {
        self.position(name).map(|idx| &self.items[idx])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| item.name == name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|item| item.enabled)
    }

    /// Enabled rows, lowest order first.
    pub fn enabled_in_order(&self) -> impl Iterator<Item = &ModConfigItem> {
        self.items.iter().filter(|item| item.enabled)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<ModConfigItem> {
        self.items
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.position(name)
            .ok_or_else(|| Error::ModNotFound(name.to_string()))
    }

    fn renumber(&mut self) {
        for (order, item) in self.items.iter_mut().enumerate() {
            item.order = order;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(registry: &OrderedRegistry) -> Vec<&str> {
        registry.items().iter().map(|i| i.name.as_str()).collect()
    }

    fn assert_dense(registry: &OrderedRegistry) {
        for (idx, item) in registry.items().iter().enumerate() {
            assert_eq!(item.order, idx);
        }
    }

    #[test]
    fn test_append_assigns_next_order() {
        let mut registry = OrderedRegistry::new();
        assert_eq!(registry.append("A").unwrap().order, 0);
        let b = registry.append("B").unwrap();
        assert_eq!(b.order, 1);
        assert!(!b.enabled);

        assert!(matches!(
            registry.append("A"),
            Err(Error::DuplicateModName(_))
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_compacts() {
        let mut registry = OrderedRegistry::new();
        for name in ["A", "B", "C"] {
            registry.append(name).unwrap();
        }
        registry.remove("B").unwrap();
        assert_eq!(names(&registry), vec!["A", "C"]);
        assert_eq!(registry.get("C").unwrap().order, 1);
        assert!(matches!(registry.remove("B"), Err(Error::ModNotFound(_))));
    }

    #[test]
    fn test_reorder() {
        let mut registry = OrderedRegistry::new();
        for name in ["A", "B", "C", "D"] {
            registry.append(name).unwrap();
        }
        registry.reorder("D", 0).unwrap();
        assert_eq!(names(&registry), vec!["D", "A", "B", "C"]);
        registry.reorder("D", 3).unwrap();
        assert_eq!(names(&registry), vec!["A", "B", "C", "D"]);
        assert_dense(&registry);

        assert!(matches!(
            registry.reorder("A", 4),
            Err(Error::InvalidPosition {
                position: 4,
                len: 4
            })
        ));
        assert!(matches!(
            registry.reorder("Z", 0),
            Err(Error::ModNotFound(_))
        ));
    }

    #[test]
    fn test_set_enabled_keeps_order() {
        let mut registry = OrderedRegistry::new();
        registry.append("A").unwrap();
        registry.append("B").unwrap();
        registry.set_enabled("B", true).unwrap();

        assert!(registry.is_enabled("B"));
        assert!(!registry.is_enabled("A"));
        assert_eq!(registry.position("B"), Some(1));
        let enabled: Vec<&str> = registry
            .enabled_in_order()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(enabled, vec!["B"]);
    }

    #[test]
    fn test_from_items_densifies_legacy_orders() {
        let registry = OrderedRegistry::from_items(vec![
            ModConfigItem {
                name: "Second".into(),
                order: 2,
                enabled: true,
            },
            ModConfigItem {
                name: "First".into(),
                order: 1,
                enabled: false,
            },
            ModConfigItem {
                name: "First".into(),
                order: 5,
                enabled: true,
            },
        ]);
        assert_eq!(names(&registry), vec!["First", "Second"]);
        assert_dense(&registry);
        assert!(!registry.is_enabled("First"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(u8),
        Remove(u8),
        Reorder(u8, usize),
        Toggle(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8).prop_map(Op::Append),
            (0u8..8).prop_map(Op::Remove),
            ((0u8..8), 0usize..10).prop_map(|(n, p)| Op::Reorder(n, p)),
            (0u8..8).prop_map(Op::Toggle),
        ]
    }

    proptest! {
        #[test]
        fn prop_orders_stay_dense(ops in proptest::collection::vec(op(), 0..64)) {
            let mut registry = OrderedRegistry::new();
            for op in ops {
                let _ = match op {
                    Op::Append(n) => registry.append(&format!("mod{n}")).map(|_| ()),
                    Op::Remove(n) => registry.remove(&format!("mod{n}")).map(|_| ()),
                    Op::Reorder(n, p) => registry.reorder(&format!("mod{n}"), p),
                    Op::Toggle(n) => {
                        let name = format!("mod{n}");
                        let enabled = registry.is_enabled(&name);
                        registry.set_enabled(&name, !enabled)
                    }
                };
                for (idx, item) in registry.items().iter().enumerate() {
                    prop_assert_eq!(item.order, idx);
                }
                let mut unique: Vec<&str> = registry.items().iter().map(|i| i.name.as_str()).collect();
                unique.sort();
                unique.dedup();
                prop_assert_eq!(unique.len(), registry.len());
            }
        }
    }
}
