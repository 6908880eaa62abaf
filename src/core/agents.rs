/// Static persona definition: identity, role, personality, and the tools it
/// may invoke. Built once at startup, immutable, never persisted.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub role: &'static str,
    pub personality: &'static str,
    /// Names of registered tools this persona may call. Empty means the
    /// completion request carries no tool declarations at all.
    pub allowed_tools: Vec<String>,
    /// Deterministic degraded-mode line used whenever the pipeline cannot
    /// produce a genuine answer.
    pub fallback_line: &'static str,
}

impl AgentProfile {
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}, {}.\n\
             Personality: {}\n\
             Respond naturally and stay in character for your role.\n\
             Keep your replies concise and useful (at most 150 words).",
            self.name, self.role, self.personality
        )
    }

    pub fn has_tools(&self) -> bool {
        !self.allowed_tools.is_empty()
    }
}

/// The fixed set of personas. Lookups for unknown ids fall back to the
/// general-purpose assistant.
pub struct AgentRoster {
    agents: Vec<AgentProfile>,
}

pub const DEFAULT_AGENT: &str = "kai";

impl AgentRoster {
    pub fn builtin() -> Self {
        let agents = vec![
            AgentProfile {
                id: "alex",
                name: "Alex",
                role: "productivity and planning assistant",
                personality: "Organized, efficient and methodical.",
                allowed_tools: vec![
                    "schedule_email_alert".to_string(),
                    "check_priority_mail".to_string(),
                ],
                fallback_line: "I'm Alex. My AI access is offline. Configure the Gemini API \
                                key to unlock my productivity advice.",
            },
            AgentProfile {
                id: "lina",
                name: "Lina",
                role: "LinkedIn and professional networking expert",
                personality: "Professional, strategic and well connected.",
                allowed_tools: vec!["check_priority_mail".to_string()],
                fallback_line: "I'm Lina. I can't analyze your situation without the Gemini \
                                API. Configure the key to get started.",
            },
            AgentProfile {
                id: "marco",
                name: "Marco",
                role: "social media and marketing specialist",
                personality: "Creative, trend-aware and engaging.",
                allowed_tools: vec![],
                fallback_line: "I'm Marco, running in demo mode. Configuring the Gemini key \
                                lets me generate creative ideas.",
            },
            AgentProfile {
                id: "sofia",
                name: "Sofia",
                role: "calendar and scheduling organizer",
                personality: "Precise, organized and forward-thinking.",
                allowed_tools: vec![
                    "add_calendar_event".to_string(),
                    "schedule_email_alert".to_string(),
                ],
                fallback_line: "I'm Sofia. My planner is on hold. Configure the Gemini API to \
                                optimize your schedule.",
            },
            AgentProfile {
                id: "kai",
                name: "Kai",
                role: "general conversational assistant",
                personality: "Friendly, curious and adaptable.",
                allowed_tools: vec![],
                fallback_line: "I'm Kai, your AI assistant. Configure the Gemini API key in \
                                the settings so I can help you.",
            },
        ];
        Self { agents }
    }

    pub fn get_or_default(&self, id: &str) -> &AgentProfile {
        let id = id.to_lowercase();
        self.agents
            .iter()
            .find(|a| a.id == id)
            .unwrap_or_else(|| self.get_or_default_inner())
    }

    fn get_or_default_inner(&self) -> &AgentProfile {
        self.agents
            .iter()
            .find(|a| a.id == DEFAULT_AGENT)
            .expect("builtin roster always contains the default agent")
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.agents.iter().map(|a| a.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_agent_falls_back_to_kai() {
        let roster = AgentRoster::builtin();
        assert_eq!(roster.get_or_default("nobody").id, "kai");
        assert_eq!(roster.get_or_default("ALEX").id, "alex");
    }

    #[test]
    fn system_prompt_carries_identity_and_personality() {
        let roster = AgentRoster::builtin();
        let prompt = roster.get_or_default("sofia").system_prompt();
        assert!(prompt.contains("You are Sofia"));
        assert!(prompt.contains("Personality: Precise"));
    }

    #[test]
    fn tool_capability_varies_per_persona() {
        let roster = AgentRoster::builtin();
        assert!(roster.get_or_default("alex").has_tools());
        assert!(!roster.get_or_default("kai").has_tools());
    }
}
