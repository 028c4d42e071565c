use crate::{config::Config, domain::Caller, errors::Error, Result};

// ============== Authorization ==============

/// Whitelist or blacklist over `platform:user` and `platform:group` ids.
///
/// Whitelist mode: a caller is allowed if their user id is listed, or the
/// request comes from a listed group. Blacklist mode: a caller is denied if
/// either is listed.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    pub use_whitelist: bool,
    pub users: Vec<String>,
    pub groups: Vec<String>,
}

impl AccessPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            use_whitelist: cfg.use_whitelist,
            users: cfg.user_list.clone(),
            groups: cfg.group_list.clone(),
        }
    }

    pub fn is_allowed(&self, caller: &Caller) -> bool {
        let user = caller.user.to_string();
        let group = caller.group_key().map(|g| g.to_string());

        let user_listed = self.users.iter().any(|u| u == &user);
        let group_listed = group
            .as_ref()
            .is_some_and(|g| self.groups.iter().any(|x| x == g));

        if self.use_whitelist {
            user_listed || group_listed
        } else {
            !(user_listed || group_listed)
        }
    }

    pub fn ensure_allowed(&self, caller: &Caller) -> Result<()> {
        if self.is_allowed(caller) {
            Ok(())
        } else {
            Err(Error::AccessDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(use_whitelist: bool, users: &[&str], groups: &[&str]) -> AccessPolicy {
        AccessPolicy {
            use_whitelist,
            users: users.iter().map(|s| s.to_string()).collect(),
            groups: groups.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_blacklist_allows_everyone() {
        let p = AccessPolicy::default();
        assert!(p.is_allowed(&Caller::private("qq", "1")));
        assert!(p.is_allowed(&Caller::in_group("qq", "g", "1")));
    }

    #[test]
    fn blacklist_denies_listed_user_or_group() {
        let p = policy(false, &["qq:1"], &["qq:bad"]);
        assert!(!p.is_allowed(&Caller::private("qq", "1")));
        assert!(p.is_allowed(&Caller::private("telegram", "1")));
        assert!(!p.is_allowed(&Caller::in_group("qq", "bad", "2")));
        assert!(matches!(
            p.ensure_allowed(&Caller::private("qq", "1")),
            Err(Error::AccessDenied)
        ));
    }

    #[test]
    fn whitelist_requires_listed_user_or_group() {
        let p = policy(true, &["qq:1"], &["qq:ok"]);
        assert!(p.is_allowed(&Caller::private("qq", "1")));
        assert!(!p.is_allowed(&Caller::private("qq", "2")));
        assert!(p.is_allowed(&Caller::in_group("qq", "ok", "2")));
        assert!(!p.is_allowed(&Caller::in_group("qq", "other", "2")));
    }
}
