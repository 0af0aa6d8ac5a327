//! Conversation identity.
//!
//! A thread is either bound to a project (shared by everyone working on it)
//! or to an unordered pair of users. The pair is stored sorted, so both
//! participants resolve the same key no matter who asks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ProjectId, UserId};

/// Two distinct users, stored in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "[UserId; 2]", into = "[UserId; 2]")]
pub struct UserPair {
    low: UserId,
    high: UserId,
}

impl UserPair {
    /// Build a sorted pair; the users must be non-blank and distinct.
    pub fn new(a: UserId, b: UserId) -> Result<Self> {
        if a.is_blank() || b.is_blank() {
            return Err(Error::invalid_thread("both participants are required"));
        }
        if a == b {
            return Err(Error::invalid_thread(format!(
                "a direct thread needs two distinct users, got {a} twice"
            )));
        }
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    #[must_use]
    pub const fn low(&self) -> &UserId {
        &self.low
    }

    #[must_use]
    pub const fn high(&self) -> &UserId {
        &self.high
    }

    #[must_use]
    pub fn contains(&self, user: &UserId) -> bool {
        self.low == *user || self.high == *user
    }

    /// The participant that is not `user`, if `user` belongs to the pair.
    #[must_use]
    pub fn other(&self, user: &UserId) -> Option<&UserId> {
        if self.low == *user {
            Some(&self.high)
        } else if self.high == *user {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl TryFrom<[UserId; 2]> for UserPair {
    type Error = Error;

    fn try_from([a, b]: [UserId; 2]) -> Result<Self> {
        Self::new(a, b)
    }
}

impl From<UserPair> for [UserId; 2] {
    fn from(pair: UserPair) -> Self {
        [pair.low, pair.high]
    }
}

/// Canonical identity of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ThreadKey {
    Project {
        #[serde(rename = "projectId")]
        project_id: ProjectId,
    },
    Direct {
        users: UserPair,
    },
}

impl ThreadKey {
    /// Whether `user` takes part in this thread.
    ///
    /// Project membership lives outside the messaging core, so project
    /// threads admit everyone.
    #[must_use]
    pub fn admits(&self, user: &UserId) -> bool {
        match self {
            Self::Project { .. } => true,
            Self::Direct { users } => users.contains(user),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project { project_id } => write!(f, "project:{project_id}"),
            Self::Direct { users } => write!(f, "direct:{}:{}", users.low, users.high),
        }
    }
}

/// Map a conversation context to its thread key.
///
/// A non-blank project wins and the users are ignored. Otherwise both users
/// must be present, non-blank and distinct.
pub fn resolve(
    project_id: Option<&ProjectId>,
    user_a: Option<&UserId>,
    user_b: Option<&UserId>,
) -> Result<ThreadKey> {
    if let Some(project_id) = project_id.filter(|p| !p.is_blank()) {
        return Ok(ThreadKey::Project {
            project_id: project_id.clone(),
        });
    }
    match (user_a, user_b) {
        (Some(a), Some(b)) => Ok(ThreadKey::Direct {
            users: UserPair::new(a.clone(), b.clone())?,
        }),
        _ => Err(Error::invalid_thread(
            "need a project id or two participant ids",
        )),
    }
}

// =============================================================================
// Poll query (wire form of a thread key)
// =============================================================================

/// Poll request parameters: exactly one of `{projectId}` or
/// `{userIdA, userIdB}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPollQuery", untagged)]
pub enum PollQuery {
    #[serde(rename_all = "camelCase")]
    Project { project_id: ProjectId },
    #[serde(rename_all = "camelCase")]
    Pair { user_id_a: UserId, user_id_b: UserId },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawPollQuery {
    project_id: Option<ProjectId>,
    user_id_a: Option<UserId>,
    user_id_b: Option<UserId>,
}

impl TryFrom<RawPollQuery> for PollQuery {
    type Error = Error;

    fn try_from(raw: RawPollQuery) -> Result<Self> {
        match (raw.project_id, raw.user_id_a, raw.user_id_b) {
            (Some(project_id), None, None) => Ok(Self::Project { project_id }),
            (None, Some(user_id_a), Some(user_id_b)) => Ok(Self::Pair {
                user_id_a,
                user_id_b,
            }),
            _ => Err(Error::invalid_thread(
                "poll query takes exactly one of {projectId} or {userIdA, userIdB}",
            )),
        }
    }
}

impl PollQuery {
    /// Resolve the query to its thread key.
    pub fn thread_key(&self) -> Result<ThreadKey> {
        match self {
            Self::Project { project_id } => resolve(Some(project_id), None, None),
            Self::Pair {
                user_id_a,
                user_id_b,
            } => resolve(None, Some(user_id_a), Some(user_id_b)),
        }
    }
}

impl From<&ThreadKey> for PollQuery {
    fn from(key: &ThreadKey) -> Self {
        match key {
            ThreadKey::Project { project_id } => Self::Project {
                project_id: project_id.clone(),
            },
            ThreadKey::Direct { users } => Self::Pair {
                user_id_a: users.low.clone(),
                user_id_b: users.high.clone(),
            },
        }
    }
}
