//! A call group: the set of call ids transitively linked to one another
//! via `xcalls` (attended transfer, call pickup, `Replaces`-based dialog
//! replacement), optionally focused on one call for display purposes.

use std::collections::HashSet;
use std::sync::Arc;

use crate::storage::Storage;

/// The transitive closure of `xcalls` links starting from one call id.
/// Membership is backed by a `HashSet` so `contains` is O(1), per
/// spec.md §3's call-group invariant; `ordered_members` is a display
/// convenience and carries no ownership over the calls it names.
#[derive(Clone, Debug, Default)]
pub struct CallGroup {
    /// The call the group was resolved from, if any; the display layer
    /// uses this to highlight one call among the group's members.
    pub focal_call_id: Option<Arc<str>>,
    members: HashSet<Arc<str>>,
}

impl CallGroup {
    pub fn resolve(storage: &Storage, root: &Arc<str>) -> Self {
        let mut members: HashSet<Arc<str>> = HashSet::new();
        let mut queue = vec![root.clone()];

        while let Some(id) = queue.pop() {
            if !members.insert(id.clone()) {
                continue;
            }
            if let Some(call) = storage.get(&id) {
                for linked in &call.xcalls {
                    if !members.contains(linked) {
                        queue.push(linked.clone());
                    }
                }
            }
        }

        Self {
            focal_call_id: Some(root.clone()),
            members,
        }
    }

    pub fn contains(&self, call_id: &Arc<str>) -> bool {
        self.members.contains(call_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members sorted for stable display; O(n log n), not the O(1)
    /// membership test above.
    pub fn ordered_members(&self) -> Vec<Arc<str>> {
        let mut members: Vec<Arc<str>> = self.members.iter().cloned().collect();
        members.sort();
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::config::StorageSettings;

    #[test]
    fn resolve_follows_xcalls_transitively() {
        let storage = Storage::new(&StorageSettings::default());
        let now = Instant::now();

        let a: Arc<str> = Arc::from("a@x");
        let b: Arc<str> = Arc::from("b@x");
        let c: Arc<str> = Arc::from("c@x");

        storage.get_or_create(&a, now).link_xcall(b.clone());
        storage.get_or_create(&b, now).link_xcall(c.clone());
        storage.get_or_create(&c, now);

        let group = CallGroup::resolve(&storage, &a);
        assert_eq!(group.len(), 3);
        assert!(group.contains(&a));
        assert!(group.contains(&b));
        assert!(group.contains(&c));
        assert_eq!(group.focal_call_id.as_ref(), Some(&a));
    }

    #[test]
    fn resolve_single_call_with_no_links() {
        let storage = Storage::new(&StorageSettings::default());
        let now = Instant::now();
        let a: Arc<str> = Arc::from("lonely");
        storage.get_or_create(&a, now);

        let group = CallGroup::resolve(&storage, &a);
        assert_eq!(group.ordered_members(), vec![a]);
    }
}
