//! Agents: the identities that hold and hand out references.

mod resolve;
pub use resolve::*;

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ValidationError;

/// Stable identifier of an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

/// Identifier of an external user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Identifier of an external user group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

/// What an agent stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum AgentKind {
    /// Nobody in particular.
    Anonymous,
    /// A single user.
    User(UserId),
    /// Every member of a group.
    Group(GroupId),
}

/// An identity that receives and emits references.
///
/// The capability model only relies on agent identity: two agents are equal
/// when they share the same [`AgentId`], whatever else they carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: AgentId,
    kind: AgentKind,
    #[serde(default)]
    is_default: bool,
}

impl Agent {
    /// Rebuild an agent from its parts, checking its invariants.
    pub fn from_parts(
        id: AgentId,
        kind: AgentKind,
        is_default: bool,
    ) -> Result<Self, ValidationError> {
        let agent = Self {
            id,
            kind,
            is_default,
        };
        agent.validate()?;
        Ok(agent)
    }

    /// A new anonymous agent.
    pub fn anonymous() -> Self {
        Self::new(AgentKind::Anonymous)
    }

    /// A new agent for `user`.
    pub fn user(user: UserId) -> Self {
        Self::new(AgentKind::User(user))
    }

    /// A new agent for `group`.
    pub fn group(group: GroupId) -> Self {
        Self::new(AgentKind::Group(group))
    }

    fn new(kind: AgentKind) -> Self {
        Self {
            id: AgentId::generate(),
            kind,
            is_default: false,
        }
    }

    /// Mark this agent as its user's default one.
    pub fn into_default(self) -> Result<Self, ValidationError> {
        Self::from_parts(self.id, self.kind, true)
    }

    /// Check the agent invariants: only user agents may be marked default.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_default && !matches!(self.kind, AgentKind::User(_)) {
            return Err(ValidationError::DefaultNotAllowed);
        }
        Ok(())
    }

    /// Identifier.
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// What the agent stands for.
    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Whether this is the user's default agent.
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Whether this agent is anonymous.
    pub fn is_anonymous(&self) -> bool {
        matches!(self.kind, AgentKind::Anonymous)
    }

    /// User this agent stands for, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self.kind {
            AgentKind::User(user) => Some(user),
            _ => None,
        }
    }

    /// Group this agent stands for, if any.
    pub fn group_id(&self) -> Option<GroupId> {
        match self.kind {
            AgentKind::Group(group) => Some(group),
            _ => None,
        }
    }

    /// Whether `user`, member of `groups`, may act as this agent.
    pub fn is_available_to(&self, user: UserId, groups: &[GroupId]) -> bool {
        match self.kind {
            AgentKind::Anonymous => false,
            AgentKind::User(owner) => owner == user,
            AgentKind::Group(group) => groups.contains(&group),
        }
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Agent {}

impl Hash for Agent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Agent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.id, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_compares_by_identity() {
        let agent = Agent::user(UserId(1));
        let same = Agent::from_parts(agent.id(), AgentKind::User(UserId(1)), true).unwrap();

        assert_eq!(agent, same);
        assert_ne!(agent, Agent::user(UserId(1)));
    }

    #[test]
    fn it_knows_anonymous_agents() {
        assert!(Agent::anonymous().is_anonymous());
        assert!(!Agent::user(UserId(1)).is_anonymous());
        assert!(!Agent::group(GroupId(1)).is_anonymous());
    }

    #[test]
    fn it_only_allows_user_agents_as_default() {
        assert!(Agent::user(UserId(1)).into_default().is_ok());
        assert_eq!(
            Agent::group(GroupId(1)).into_default(),
            Err(ValidationError::DefaultNotAllowed)
        );
        assert_eq!(
            Agent::anonymous().into_default(),
            Err(ValidationError::DefaultNotAllowed)
        );
    }

    #[test]
    fn it_validates_anonymous_agents() {
        assert!(Agent::anonymous().validate().is_ok());
    }

    #[test]
    fn it_knows_who_may_act_as_it() {
        let groups = [GroupId(1)];
        assert!(Agent::user(UserId(1)).is_available_to(UserId(1), &groups));
        assert!(!Agent::user(UserId(2)).is_available_to(UserId(1), &groups));
        assert!(Agent::group(GroupId(1)).is_available_to(UserId(1), &groups));
        assert!(!Agent::group(GroupId(2)).is_available_to(UserId(1), &groups));
        assert!(!Agent::anonymous().is_available_to(UserId(1), &groups));
    }

    #[test]
    fn it_round_trips_through_serde() {
        let agent = Agent::group(GroupId(4));
        let value = serde_json::to_value(&agent).unwrap();

        assert_eq!(value["kind"], serde_json::json!({ "kind": "group", "id": 4 }));
        let decoded: Agent = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.kind(), agent.kind());
        assert_eq!(decoded, agent);
    }
}
