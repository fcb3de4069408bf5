use crate::{Agent, AgentId, UserId};

/// Pick the active agent for a request.
///
/// `agents` are the candidates available to the requester (their own user
/// agent and the agents of their groups, or anonymous agents when nobody is
/// signed in). `token` is an optional externally supplied agent id, such
/// as a cookie value.
///
/// Resolution order:
/// 1. the candidate whose id matches `token`;
/// 2. for an anonymous requester, the first candidate;
/// 3. the first candidate marked default;
/// 4. the requester's own user agent.
pub fn resolve_agent<'a>(
    agents: &'a [Agent],
    token: Option<&AgentId>,
    requester: Option<UserId>,
) -> Option<&'a Agent> {
    if let Some(agent) = token.and_then(|token| agents.iter().find(|agent| agent.id() == *token)) {
        return Some(agent);
    }

    let Some(user) = requester else {
        return agents.first();
    };

    agents
        .iter()
        .find(|agent| agent.is_default())
        .or_else(|| agents.iter().find(|agent| agent.user_id() == Some(user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GroupId;

    fn candidates() -> (Agent, Agent, Agent) {
        (
            Agent::group(GroupId(1)),
            Agent::user(UserId(7)),
            Agent::group(GroupId(2)),
        )
    }

    #[test]
    fn it_prefers_the_token_match() {
        let (group, user, other) = candidates();
        let agents = [group, user.clone().into_default().unwrap(), other.clone()];

        let agent = resolve_agent(&agents, Some(&other.id()), Some(UserId(7)));
        assert_eq!(agent, Some(&other));
    }

    #[test]
    fn it_ignores_unknown_tokens() {
        let (group, user, other) = candidates();
        let agents = [group, user.clone(), other];

        let agent = resolve_agent(&agents, Some(&AgentId::generate()), Some(UserId(7)));
        assert_eq!(agent, Some(&user));
    }

    #[test]
    fn it_falls_back_to_the_default_agent() {
        let (group, user, other) = candidates();
        let default = user.into_default().unwrap();
        let agents = [group, other, default.clone()];

        assert_eq!(resolve_agent(&agents, None, Some(UserId(7))), Some(&default));
    }

    #[test]
    fn it_falls_back_to_the_user_agent() {
        let (group, user, other) = candidates();
        let agents = [group, user.clone(), other];

        assert_eq!(resolve_agent(&agents, None, Some(UserId(7))), Some(&user));
    }

    #[test]
    fn it_picks_the_first_agent_for_anonymous_requests() {
        let anonymous = Agent::anonymous();
        let agents = [anonymous.clone(), Agent::anonymous()];

        assert_eq!(resolve_agent(&agents, None, None), Some(&anonymous));
    }

    #[test]
    fn it_resolves_nothing_without_candidates() {
        assert_eq!(resolve_agent(&[], None, Some(UserId(7))), None);
        assert_eq!(resolve_agent(&[], None, None), None);

        let agents = [Agent::group(GroupId(3))];
        assert_eq!(resolve_agent(&agents, None, Some(UserId(7))), None);
    }
}
