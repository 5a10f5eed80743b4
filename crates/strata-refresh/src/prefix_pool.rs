/// A pool of strings in which no member is a prefix of another.
///
/// Used to remember canonical directory paths (with a trailing separator)
/// already reached through symbolic links, so a link into one of them is
/// not traversed twice.
#[derive(Clone, Debug, Default)]
pub struct PrefixPool {
    pool: Vec<String>,
}

impl PrefixPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.pool.clear();
    }

    pub fn size(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.pool.clone()
    }

    /// Insert `s`, dropping members that are prefixes of it. Nothing is
    /// inserted if `s` is already a prefix of a member.
    ///
    /// Returns `true` if the pool changed.
    pub fn insert_longer(&mut self, s: &str) -> bool {
        if self.contains_as_prefix(s) {
            return false;
        }
        self.pool.retain(|member| !s.starts_with(member.as_str()));
        self.pool.push(s.to_string());
        true
    }

    /// Insert `s`, dropping members it is a prefix of. Nothing is inserted
    /// if a member is already a prefix of `s`.
    ///
    /// Returns `true` if the pool changed.
    pub fn insert_shorter(&mut self, s: &str) -> bool {
        if self.has_prefix_of(s) {
            return false;
        }
        self.pool.retain(|member| !member.starts_with(s));
        self.pool.push(s.to_string());
        true
    }

    /// Whether some member starts with `s`.
    pub fn contains_as_prefix(&self, s: &str) -> bool {
        self.pool.iter().any(|member| member.starts_with(s))
    }

    /// Whether some member is a prefix of `s`.
    pub fn has_prefix_of(&self, s: &str) -> bool {
        self.pool.iter().any(|member| s.starts_with(member.as_str()))
    }
}
