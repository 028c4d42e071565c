use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Composite `(platform, user)` identity.
///
/// The same numeric user id can exist on several platforms, so every per-user
/// table is keyed by this pair. Serialized as `platform:user`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserKey {
    pub platform: String,
    pub user: String,
}

impl UserKey {
    pub fn new(platform: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.user)
    }
}

impl From<UserKey> for String {
    fn from(k: UserKey) -> Self {
        k.to_string()
    }
}

impl TryFrom<String> for UserKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        // Platform names never contain ':'; user ids might.
        let Some((platform, user)) = s.split_once(':') else {
            return Err(Error::Config(format!("invalid user key: {s}")));
        };
        if platform.is_empty() || user.is_empty() {
            return Err(Error::Config(format!("invalid user key: {s}")));
        }
        Ok(Self::new(platform, user))
    }
}

/// Group (chat room) identity, scoped by platform like [`UserKey`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub platform: String,
    pub group: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.group)
    }
}

/// Who is asking, as supplied by the dispatch layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user: UserKey,
    /// Group id when the request came from a group chat.
    pub group: Option<String>,
}

impl Caller {
    pub fn private(platform: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            user: UserKey::new(platform, user),
            group: None,
        }
    }

    pub fn in_group(
        platform: impl Into<String>,
        group: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            user: UserKey::new(platform, user),
            group: Some(group.into()),
        }
    }

    pub fn group_key(&self) -> Option<GroupKey> {
        self.group.as_ref().map(|g| GroupKey {
            platform: self.user.platform.clone(),
            group: g.clone(),
        })
    }

    /// Cooldown scope for this request. Group and private cooldowns never share state.
    pub fn scope(&self) -> ScopeKey {
        match self.group_key() {
            Some(group) => ScopeKey::Group {
                group,
                user: self.user.clone(),
            },
            None => ScopeKey::User(self.user.clone()),
        }
    }
}

/// Key of one rate window.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    User(UserKey),
    Group { group: GroupKey, user: UserKey },
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::User(u) => write!(f, "user {u}"),
            ScopeKey::Group { group, user } => write!(f, "group {group} user {}", user.user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_round_trips_through_string() {
        let k = UserKey::new("qq", "10001");
        let s: String = k.clone().into();
        assert_eq!(s, "qq:10001");
        assert_eq!(UserKey::try_from(s).unwrap(), k);
        assert!(UserKey::try_from("nocolon".to_string()).is_err());
        assert!(UserKey::try_from(":x".to_string()).is_err());
    }

    #[test]
    fn group_and_private_scopes_differ() {
        let private = Caller::private("qq", "1");
        let grouped = Caller::in_group("qq", "g1", "1");
        assert_ne!(private.scope(), grouped.scope());
        assert_eq!(private.scope(), ScopeKey::User(UserKey::new("qq", "1")));
    }
}
