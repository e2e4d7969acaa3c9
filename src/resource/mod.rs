//! Exclusive ownership of shared machine resources
//!
//! Channels take resources in ascending order only; that ordering is what keeps two
//! channels from each holding what the other one waits for.

use log::error;
use std::fmt;

pub type ChannelId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resource {
    Movement,
    FileSystem,
    Heater(u8),
}

pub const HEATER_BANKS: usize = 8;
const RESOURCE_COUNT: usize = 2 + HEATER_BANKS;

impl Resource {
    pub fn index(self) -> usize {
        match self {
            Resource::Movement => 0,
            Resource::FileSystem => 1,
            Resource::Heater(n) => 2 + n as usize,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Movement => write!(f, "movement"),
            Resource::FileSystem => write!(f, "file system"),
            Resource::Heater(n) => write!(f, "heater bank {}", n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockManager {
    owners: [Option<ChannelId>; RESOURCE_COUNT],
}

impl Default for LockManager {
    fn default() -> Self {
        Self {
            owners: [None; RESOURCE_COUNT],
        }
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self, resource: Resource) -> Option<ChannelId> {
        self.owners.get(resource.index()).copied().flatten()
    }

    pub fn holds(&self, channel: ChannelId, resource: Resource) -> bool {
        self.owner(resource) == Some(channel)
    }

    /// Highest resource index this channel currently owns
    fn highest_held(&self, channel: ChannelId) -> Option<usize> {
        self.owners.iter().rposition(|o| *o == Some(channel))
    }

    /// Take a resource without blocking. Returns false if another channel owns it
    /// or if taking it would break the ascending acquisition order.
    pub fn try_lock(&mut self, channel: ChannelId, resource: Resource) -> bool {
        let index = resource.index();
        if index >= RESOURCE_COUNT {
            error!("channel {} asked for unknown resource {}", channel, resource);
            return false;
        }

        match self.owners[index] {
            Some(owner) if owner == channel => return true,
            Some(_) => return false,
            None => {}
        }

        if let Some(highest) = self.highest_held(channel) {
            if highest > index {
                debug_assert!(
                    false,
                    "channel {} locked resource {} out of order",
                    channel, resource
                );
                error!(
                    "channel {} tried to lock {} while holding a higher resource",
                    channel, resource
                );
                return false;
            }
        }

        self.owners[index] = Some(channel);
        true
    }

    /// Take every resource in the slice, in ascending order. All or nothing.
    pub fn try_lock_all(&mut self, channel: ChannelId, resources: &[Resource]) -> bool {
        let mut wanted = resources.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut taken = Vec::new();
        for resource in wanted {
            let already = self.holds(channel, resource);
            if !self.try_lock(channel, resource) {
                for r in taken.into_iter().rev() {
                    self.unlock(channel, r);
                }
                return false;
            }
            if !already {
                taken.push(resource);
            }
        }
        true
    }

    pub fn unlock(&mut self, channel: ChannelId, resource: Resource) {
        if let Some(slot) = self.owners.get_mut(resource.index()) {
            if *slot == Some(channel) {
                *slot = None;
            }
        }
    }

    pub fn unlock_all(&mut self, channel: ChannelId) {
        for slot in self.owners.iter_mut() {
            if *slot == Some(channel) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exclusive_ownership() {
        let mut locks = LockManager::new();
        assert!(locks.try_lock(0, Resource::Movement));
        assert!(!locks.try_lock(1, Resource::Movement));
        assert!(locks.try_lock(0, Resource::Movement));
        assert_eq!(locks.owner(Resource::Movement), Some(0));

        locks.unlock(1, Resource::Movement);
        assert_eq!(locks.owner(Resource::Movement), Some(0));

        locks.unlock(0, Resource::Movement);
        assert!(locks.try_lock(1, Resource::Movement));
    }

    #[test]
    fn test_unlock_all_releases_only_own_resources() {
        let mut locks = LockManager::new();
        assert!(locks.try_lock(0, Resource::Movement));
        assert!(locks.try_lock(0, Resource::FileSystem));
        assert!(locks.try_lock(1, Resource::Heater(0)));

        locks.unlock_all(0);
        assert_eq!(locks.owner(Resource::Movement), None);
        assert_eq!(locks.owner(Resource::FileSystem), None);
        assert_eq!(locks.owner(Resource::Heater(0)), Some(1));
    }

    #[test]
    fn test_lock_all_is_all_or_nothing() {
        let mut locks = LockManager::new();
        assert!(locks.try_lock(1, Resource::FileSystem));

        assert!(!locks.try_lock_all(0, &[Resource::FileSystem, Resource::Movement]));
        assert_eq!(locks.owner(Resource::Movement), None);

        locks.unlock_all(1);
        assert!(locks.try_lock_all(0, &[Resource::FileSystem, Resource::Movement]));
        assert!(locks.holds(0, Resource::Movement));
        assert!(locks.holds(0, Resource::FileSystem));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "out of order"))]
    fn test_out_of_order_acquisition() {
        let mut locks = LockManager::new();
        assert!(locks.try_lock(0, Resource::FileSystem));
        assert!(!locks.try_lock(0, Resource::Movement));
    }
}
