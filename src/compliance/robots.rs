//! robots.txt parsing with longest-prefix rule matching.

use std::collections::HashMap;
use std::time::Duration;

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    /// Rules per user-agent token (lowercase)
    rules: HashMap<String, AgentRules>,

    /// Default rules (for *)
    default_rules: AgentRules,

    /// Sitemaps listed
    sitemaps: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct AgentRules {
    /// (path prefix, allowed) pairs; resolution picks the longest match.
    rules: Vec<(String, bool)>,

    crawl_delay: Option<f64>,
}

impl RobotsTxt {
    /// Parse robots.txt content.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();
        let mut in_group = false;

        let mut flush = |agents: &mut Vec<String>, rules: &mut AgentRules, robots: &mut Self| {
            for agent in agents.drain(..) {
                if agent == "*" {
                    robots.default_rules = rules.clone();
                } else {
                    robots.rules.insert(agent, rules.clone());
                }
            }
            *rules = AgentRules::default();
        };

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group.
                    if in_group {
                        flush(&mut current_agents, &mut current_rules, &mut robots);
                        in_group = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    in_group = true;
                    if !value.is_empty() {
                        current_rules.rules.push((value.to_string(), false));
                    }
                }
                "allow" => {
                    in_group = true;
                    if !value.is_empty() {
                        current_rules.rules.push((value.to_string(), true));
                    }
                }
                "crawl-delay" => {
                    in_group = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        current_rules.crawl_delay = Some(delay);
                    }
                }
                "sitemap" => {
                    robots.sitemaps.push(value.to_string());
                }
                _ => {}
            }
        }
        flush(&mut current_agents, &mut current_rules, &mut robots);

        robots
    }

    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        let agent_lower = user_agent.to_lowercase();
        self.rules
            .get(&agent_lower)
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|(token, _)| agent_lower.contains(token.as_str()))
                    .map(|(_, rules)| rules)
            })
            .unwrap_or(&self.default_rules)
    }

    /// Check whether a path is allowed for a user-agent.
    ///
    /// The longest matching prefix wins; on equal length an Allow rule
    /// beats a Disallow.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let rules = self.rules_for(user_agent);

        let mut best: Option<(usize, bool)> = None;
        for (prefix, allowed) in &rules.rules {
            if !path.starts_with(prefix.as_str()) {
                continue;
            }
            let candidate = (prefix.len(), *allowed);
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.0 > current.0 || (candidate.0 == current.0 && candidate.1) {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }

        best.map(|(_, allowed)| allowed).unwrap_or(true)
    }

    /// Crawl delay for a user-agent, falling back to the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent)
            .crawl_delay
            .or(self.default_rules.crawl_delay)
            .map(Duration::from_secs_f64)
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Whether the agent is barred from the whole site.
    pub fn disallows_all(&self, user_agent: &str) -> bool {
        !self.is_allowed(user_agent, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let content = r#"
User-agent: *
Disallow: /private/
Disallow: /admin
Allow: /public/
Crawl-delay: 2

Sitemap: https://example.com/sitemap.xml
        "#;

        let robots = RobotsTxt::parse(content);

        assert!(robots.is_allowed("UrwaBot", "/public/page"));
        assert!(!robots.is_allowed("UrwaBot", "/private/page"));
        assert!(!robots.is_allowed("UrwaBot", "/admin"));
        assert!(!robots.is_allowed("UrwaBot", "/admin/settings"));
        assert!(robots.is_allowed("UrwaBot", "/other/page"));

        assert_eq!(robots.crawl_delay("UrwaBot"), Some(Duration::from_secs(2)));
        assert_eq!(robots.sitemaps().len(), 1);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let content = r#"
User-agent: *
Disallow: /shop/
Allow: /shop/catalog/
Disallow: /shop/catalog/internal/
        "#;

        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed("Bot", "/shop/cart"));
        assert!(robots.is_allowed("Bot", "/shop/catalog/shoes"));
        assert!(!robots.is_allowed("Bot", "/shop/catalog/internal/prices"));
    }

    #[test]
    fn test_allow_wins_ties() {
        let content = r#"
User-agent: *
Disallow: /folder/
Allow: /folder/
        "#;

        let robots = RobotsTxt::parse(content);
        assert!(robots.is_allowed("Bot", "/folder/page"));
    }

    #[test]
    fn test_specific_user_agent_group() {
        let content = r#"
User-agent: *
Disallow: /

User-agent: goodbot
Disallow:
        "#;

        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed("BadBot", "/page"));
        assert!(robots.is_allowed("GoodBot/2.1", "/page"));
        assert!(robots.disallows_all("BadBot"));
    }

    #[test]
    fn test_agent_crawl_delay_overrides_default() {
        let content = r#"
User-agent: *
Crawl-delay: 1

User-agent: urwabot
Crawl-delay: 7
Disallow: /tmp/
        "#;

        let robots = RobotsTxt::parse(content);
        assert_eq!(
            robots.crawl_delay("UrwaBot/1.0"),
            Some(Duration::from_secs(7))
        );
        assert_eq!(robots.crawl_delay("Other"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_empty_and_comment_only_files_allow_all() {
        for content in ["", "# nothing here\n\n# at all"] {
            let robots = RobotsTxt::parse(content);
            assert!(robots.is_allowed("AnyBot", "/any/path"));
            assert!(robots.crawl_delay("AnyBot").is_none());
        }
    }

    #[test]
    fn test_consecutive_agent_lines_share_rules() {
        let content = r#"
User-agent: alpha
User-agent: beta
Disallow: /x/
        "#;

        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed("alpha", "/x/1"));
        assert!(!robots.is_allowed("beta", "/x/1"));
        assert!(robots.is_allowed("gamma", "/x/1"));
    }
}
