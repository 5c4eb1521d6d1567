/// Where a provider request originates. Each call site draws from its own
/// credential slot so one busy job can't exhaust the quota of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Leagues,
    Matches,
    Rankings,
    Odds,
    Players,
}

impl CallSite {
    fn slot(self) -> usize {
        match self {
            CallSite::Leagues | CallSite::Matches | CallSite::Rankings => 0,
            CallSite::Odds => 1,
            CallSite::Players => 2,
        }
    }
}

/// API keys for the structured provider, rotated by call site.
#[derive(Clone)]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl CredentialPool {
    /// `None` when no usable key is configured (provider disabled).
    pub fn new(keys: impl IntoIterator<Item = String>) -> Option<Self> {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            None
        } else {
            Some(CredentialPool { keys })
        }
    }

    /// Key for a call site; slots wrap when fewer keys are configured.
    pub fn for_site(&self, site: CallSite) -> &str {
        &self.keys[site.slot() % self.keys.len()]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialPool({} keys)", self.keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sites_rotate_across_keys() {
        let pool = CredentialPool::new(["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(pool.for_site(CallSite::Matches), "a");
        assert_eq!(pool.for_site(CallSite::Odds), "b");
        assert_eq!(pool.for_site(CallSite::Players), "c");
    }

    #[test]
    fn single_key_serves_every_site() {
        let pool = CredentialPool::new(["only".into()]).unwrap();
        assert_eq!(pool.for_site(CallSite::Players), "only");
        assert_eq!(pool.for_site(CallSite::Odds), "only");
    }

    #[test]
    fn blank_keys_are_ignored() {
        assert!(CredentialPool::new([" ".to_string(), String::new()]).is_none());
        assert_eq!(CredentialPool::new(["x ".into(), "".into()]).unwrap().len(), 1);
    }

    #[test]
    fn debug_hides_keys() {
        let pool = CredentialPool::new(["secret".into()]).unwrap();
        assert!(!format!("{pool:?}").contains("secret"));
    }
}
