//! Per-function filtering and sampling decisions
//!
//! The table is keyed by the instrumented function's address and consulted on
//! every hook invocation, so lookups go through an FNV-hashed map.
//!
//! Sampling is deterministic: a function sampled with ratio N records its
//! first call and then every Nth call after it.

use fnv::FnvHashMap;
use serde::Serialize;
use std::fmt;

/// Address of an instrumented function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FunctionId(pub usize);

impl FunctionId {
    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for FunctionId {
    fn from(addr: usize) -> Self {
        FunctionId(addr)
    }
}

/// Filtering and sampling state of a single function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Policy {
    /// Never record this function
    pub filtered: bool,
    /// Record only one call out of `sample_ratio`
    pub sampled: bool,
    pub sample_ratio: u32,
    /// Calls left to skip before the next recorded one, always `< sample_ratio`
    pub sample_counter: u32,
}

impl Policy {
    pub fn filter() -> Self {
        Self {
            filtered: true,
            ..Self::default()
        }
    }

    /// Sampling policy recording one call in `ratio`, starting with the next call.
    ///
    /// Ratios below 2 are equivalent to recording every call and yield `None`.
    pub fn sample(ratio: u32) -> Option<Self> {
        if ratio < 2 {
            return None;
        }
        Some(Self {
            filtered: false,
            sampled: true,
            sample_ratio: ratio,
            sample_counter: 0,
        })
    }

    /// Decide whether the current call is recorded, advancing the sample counter.
    pub fn should_record(&mut self) -> bool {
        if self.filtered {
            return false;
        }
        if !self.sampled {
            return true;
        }
        match self.sample_counter.checked_sub(1) {
            Some(remaining) => {
                self.sample_counter = remaining;
                false
            }
            None => {
                self.sample_counter = self.sample_ratio.saturating_sub(1);
                true
            }
        }
    }

    /// True when every call is recorded, independent of call order
    pub fn records_unconditionally(&self) -> bool {
        !self.filtered && !self.sampled
    }
}

/// Mapping from function address to its policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    policies: FnvHashMap<FunctionId, Policy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter a function, replacing any policy it already has
    pub fn insert_filter(&mut self, func: FunctionId) {
        self.policies.insert(func, Policy::filter());
    }

    /// Sample a function unless it already has a policy.
    ///
    /// Returns whether the table changed. The first definition of a function
    /// wins and ratios below 2 are ignored.
    pub fn insert_sample(&mut self, func: FunctionId, ratio: u32) -> bool {
        if self.policies.contains_key(&func) {
            return false;
        }
        match Policy::sample(ratio) {
            Some(policy) => {
                self.policies.insert(func, policy);
                true
            }
            None => false,
        }
    }

    /// The stored policy, or the always-record default
    pub fn lookup(&self, func: FunctionId) -> Policy {
        self.policies.get(&func).copied().unwrap_or_default()
    }

    /// Decide whether this call of `func` is recorded
    pub fn should_record(&mut self, func: FunctionId) -> bool {
        match self.policies.get_mut(&func) {
            Some(policy) => policy.should_record(),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn clear(&mut self) {
        self.policies.clear();
    }

    pub fn filtered_count(&self) -> usize {
        self.policies.values().filter(|p| p.filtered).count()
    }

    pub fn sampled_count(&self) -> usize {
        self.policies.values().filter(|p| p.sampled).count()
    }

    /// Policies sorted by function address
    pub fn iter_sorted(&self) -> Vec<(FunctionId, Policy)> {
        let mut entries: Vec<_> = self.policies.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(func, _)| *func);
        entries
    }
}

impl Serialize for PolicyTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let entries = self.iter_sorted();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (func, policy) in entries {
            map.serialize_entry(&func.to_string(), &policy)?;
        }
        map.end()
    }
}
