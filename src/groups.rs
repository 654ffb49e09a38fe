//! Group membership index consumed by selector resolution.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::runtime::Mutex;

/// A device group as reported by its members.
#[derive(Debug, Clone)]
pub struct Group {
    id: Uuid,
    label: String,
    members: HashSet<String>,
}

impl Group {
    /// Wire-protocol group identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable group label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Serials of the devices that reported this group.
    pub fn members(&self) -> &HashSet<String> {
        &self.members
    }

    /// Whether a serial belongs to this group.
    pub fn contains(&self, serial: &str) -> bool {
        self.members.contains(serial)
    }
}

/// Index mapping devices to group identity.
///
/// Devices report their group during attribute fetches; a device that
/// changes groups is simply re-associated on its next refresh. There is
/// no removal path.
pub struct GroupRegistry {
    groups: Mutex<HashMap<Uuid, Group>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        GroupRegistry {
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Associate a device with a group, moving it out of any group it
    /// was previously in and refreshing the group's label.
    pub async fn register(&self, serial: &str, id: Uuid, label: &str) {
        let mut groups = self.groups.lock().await;
        for group in groups.values_mut() {
            group.members.remove(serial);
        }
        let group = groups.entry(id).or_insert_with(|| Group {
            id,
            label: label.to_string(),
            members: HashSet::new(),
        });
        group.label = label.to_string();
        group.members.insert(serial.to_string());
    }

    /// Serials of every device in groups with exactly this label,
    /// sorted for stable iteration.
    pub async fn members_of(&self, label: &str) -> Vec<String> {
        let groups = self.groups.lock().await;
        let mut members: Vec<String> = groups
            .values()
            .filter(|group| group.label == label)
            .flat_map(|group| group.members.iter().cloned())
            .collect();
        members.sort();
        members.dedup();
        members
    }

    /// The group a device currently belongs to, if any.
    pub async fn group_of(&self, serial: &str) -> Option<Group> {
        self.groups
            .lock()
            .await
            .values()
            .find(|group| group.contains(serial))
            .cloned()
    }

    /// Snapshot of every known group.
    pub async fn groups(&self) -> Vec<Group> {
        self.groups.lock().await.values().cloned().collect()
    }

    /// Number of known groups.
    pub async fn len(&self) -> usize {
        self.groups.lock().await.len()
    }

    /// Whether no groups are known.
    pub async fn is_empty(&self) -> bool {
        self.groups.lock().await.is_empty()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_associates_members() {
        let registry = GroupRegistry::new();
        let kitchen = Uuid::new_v4();
        registry.register("d073d5112233", kitchen, "Kitchen").await;
        registry.register("d073d5aabbcc", kitchen, "Kitchen").await;

        let members = registry.members_of("Kitchen").await;
        assert_eq!(members, vec!["d073d5112233", "d073d5aabbcc"]);
    }

    #[tokio::test]
    async fn test_reassociation_moves_the_device() {
        let registry = GroupRegistry::new();
        let kitchen = Uuid::new_v4();
        let attic = Uuid::new_v4();

        registry.register("d073d5112233", kitchen, "Kitchen").await;
        registry.register("d073d5112233", attic, "Attic").await;

        assert!(registry.members_of("Kitchen").await.is_empty());
        assert_eq!(registry.members_of("Attic").await, vec!["d073d5112233"]);
        assert_eq!(registry.group_of("d073d5112233").await.unwrap().label(), "Attic");
    }

    #[tokio::test]
    async fn test_label_refresh_is_last_write_wins() {
        let registry = GroupRegistry::new();
        let id = Uuid::new_v4();
        registry.register("d073d5112233", id, "Kitchen").await;
        registry.register("d073d5aabbcc", id, "Kitchen II").await;

        assert!(registry.members_of("Kitchen").await.is_empty());
        assert_eq!(registry.members_of("Kitchen II").await.len(), 2);
    }

    #[tokio::test]
    async fn test_same_label_across_groups_is_a_union() {
        let registry = GroupRegistry::new();
        registry.register("d073d5112233", Uuid::new_v4(), "Lamps").await;
        registry.register("d073d5aabbcc", Uuid::new_v4(), "Lamps").await;

        assert_eq!(registry.members_of("Lamps").await.len(), 2);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_match_is_exact() {
        let registry = GroupRegistry::new();
        registry.register("d073d5112233", Uuid::new_v4(), "Kitchen").await;
        assert!(registry.members_of("kitchen").await.is_empty());
    }
}
