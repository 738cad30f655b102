//! Rotating browser user agents.

use rand::seq::SliceRandom;

/// Realistic desktop browser user agents used when no others are configured.
const BUILTIN_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; rv:115.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

/// A pool of user agents to pick from at random.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    /// Built-in agents plus any `extra` ones (blank entries ignored).
    pub fn new(extra: &[String]) -> Self {
        let mut agents: Vec<String> = BUILTIN_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        agents.extend(
            extra
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
        Self { agents }
    }

    /// Pick a random agent.
    pub fn pick(&self) -> &str {
        self.agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(BUILTIN_USER_AGENTS[0])
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extras_are_added_and_blanks_dropped() {
        let pool = UserAgentPool::new(&["CustomAgent/1.0".into(), "  ".into()]);
        assert_eq!(pool.len(), BUILTIN_USER_AGENTS.len() + 1);
    }

    #[test]
    fn pick_returns_a_known_agent() {
        let pool = UserAgentPool::new(&["CustomAgent/1.0".into()]);
        for _ in 0..20 {
            let ua = pool.pick();
            assert!(ua == "CustomAgent/1.0" || BUILTIN_USER_AGENTS.contains(&ua));
        }
    }
}
