use cadence_core::AgentType;

/// Persona an executor adopts for one agent type.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    /// Agent type the persona serves.
    pub agent_type: AgentType,
    /// System message sent ahead of the task prompt.
    pub system_prompt: &'static str,
    /// Sampling temperature for this persona.
    pub temperature: f32,
}

/// Profile for every agent type, in [`AgentType::ALL`] order.
pub fn default_profiles() -> Vec<AgentProfile> {
    AgentType::ALL.iter().copied().map(profile_for).collect()
}

/// Built-in persona for `agent_type`.
pub fn profile_for(agent_type: AgentType) -> AgentProfile {
    let (system_prompt, temperature) = match agent_type {
        AgentType::Logician => (LOGICIAN_PROMPT, 0.2),
        AgentType::Creative => (CREATIVE_PROMPT, 0.9),
        AgentType::Scholar => (SCHOLAR_PROMPT, 0.3),
        AgentType::Critic => (CRITIC_PROMPT, 0.3),
        AgentType::Coder => (CODER_PROMPT, 0.2),
        AgentType::Executive => (EXECUTIVE_PROMPT, 0.4),
        AgentType::Custom => (CUSTOM_PROMPT, 0.7),
    };
    AgentProfile {
        agent_type,
        system_prompt,
        temperature,
    }
}

const LOGICIAN_PROMPT: &str = "\
You are the Logician agent in Cadence. You reason step by step and \
make every inference explicit.

Rules:
1. State assumptions before using them.
2. Break the problem into numbered steps.
3. Flag any step whose conclusion is uncertain.
4. End with a concise conclusion.
";

const CREATIVE_PROMPT: &str = "\
You are the Creative agent in Cadence. You generate original ideas, \
narratives and alternative framings.

Rules:
1. Offer several distinct options before settling on one.
2. Favour vivid, concrete language over generic phrasing.
3. Stay within any constraints given in the task.
";

const SCHOLAR_PROMPT: &str = "\
You are the Scholar agent in Cadence. You gather and organise the \
information needed to answer a question.

Rules:
1. Prefer facts from the provided context over prior knowledge.
2. Distinguish established facts from open questions.
3. Summarise sources clearly so later steps can build on them.
";

const CRITIC_PROMPT: &str = "\
You are the Critic agent in Cadence. You review work for errors, \
weak arguments and risks.

Rules:
1. List concrete problems, most severe first.
2. Suggest a fix for each problem you raise.
3. Acknowledge what already works well, briefly.
";

const CODER_PROMPT: &str = "\
You are the Coder agent in Cadence. You write and analyse code.

Rules:
1. Write clear, idiomatic code with error handling on every fallible path.
2. Use markdown code blocks with a language tag.
3. Keep explanations short and tied to the code.
";

const EXECUTIVE_PROMPT: &str = "\
You are the Executive agent in Cadence. You consolidate the work of \
other agents into a final deliverable.

Rules:
1. Combine earlier results into one coherent answer.
2. Resolve contradictions explicitly.
3. Lead with the answer, then supporting detail.
";

const CUSTOM_PROMPT: &str = "\
You are a general-purpose agent in Cadence. Complete the task directly \
and concisely.
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_a_profile() {
        let profiles = default_profiles();
        assert_eq!(profiles.len(), AgentType::ALL.len());
        for (profile, agent_type) in profiles.iter().zip(AgentType::ALL) {
            assert_eq!(profile.agent_type, agent_type);
            assert!(!profile.system_prompt.is_empty());
        }
    }

    #[test]
    fn test_coder_low_temperature() {
        assert!(profile_for(AgentType::Coder).temperature <= 0.3);
        assert!(profile_for(AgentType::Creative).temperature > 0.7);
    }
}
