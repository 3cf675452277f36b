//! A shard group: one leader, zero or more followers, one key range.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::database::Database;

/// Half-open partition key range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub start: u64,
    pub end: u64,
}

impl KeyRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, key: u64) -> bool {
        self.start <= key && key < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadPreference {
    #[default]
    Leader,
    Follower,
}

#[derive(Debug)]
pub struct ShardGroup {
    name: String,
    leader: Database,
    followers: Vec<Database>,
    range: KeyRange,
    counter: AtomicU64,
}

impl ShardGroup {
    pub fn new(
        name: impl Into<String>,
        leader: Database,
        followers: Vec<Database>,
        range: KeyRange,
    ) -> Self {
        Self {
            name: name.into(),
            leader,
            followers,
            range,
            counter: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> KeyRange {
        self.range
    }

    pub fn followers(&self) -> &[Database] {
        &self.followers
    }

    /// All writes go to the leader.
    pub fn leader_connection(&self) -> &Database {
        &self.leader
    }

    /// Round-robin over followers; the leader when there are none.
    pub fn follower_connection(&self) -> &Database {
        if self.followers.is_empty() {
            return &self.leader;
        }
        let n = self.followers.len() as u64;
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % n;
        &self.followers[index as usize]
    }

    pub fn connection_for(&self, preference: ReadPreference) -> &Database {
        match preference {
            ReadPreference::Leader => self.leader_connection(),
            ReadPreference::Follower => self.follower_connection(),
        }
    }
}
