//! Robots.txt rule evaluation
//!
//! Allow/disallow matching is delegated to the robotstxt crate; the
//! `Crawl-delay` extension is not covered by it, so groups are scanned here
//! once when the file is loaded.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// One `User-agent` group that carries a `Crawl-delay`
#[derive(Debug, Clone, PartialEq)]
struct DelayGroup {
    agents: Vec<String>,
    delay: Duration,
}

/// Parsed robots.txt data for one host
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw robots.txt body; `None` means every path is allowed
    rules: Option<String>,

    delay_groups: Vec<DelayGroup>,
}

impl ParsedRobots {
    /// Creates a ParsedRobots from a robots.txt body
    pub fn from_content(content: &str) -> Self {
        if content.trim().is_empty() {
            return Self::allow_all();
        }

        Self {
            rules: Some(content.to_string()),
            delay_groups: parse_delay_groups(content),
        }
    }

    /// Creates a permissive policy
    ///
    /// Used when robots.txt is absent, unreachable or politeness checks are off.
    pub fn allow_all() -> Self {
        Self {
            rules: None,
            delay_groups: Vec::new(),
        }
    }

    /// Returns true if this policy never disallows anything
    pub fn is_allow_all(&self) -> bool {
        self.rules.is_none()
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL or path to check
    /// * `user_agent` - The product token of the crawler
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match &self.rules {
            None => true,
            Some(rules) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(rules, user_agent, url)
            }
        }
    }

    /// Gets the crawl delay for a user agent
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let agent = user_agent.to_lowercase();

        let specific = self
            .delay_groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && agent.contains(a.as_str())))
            .map(|g| g.delay)
            .next();

        specific.or_else(|| {
            self.delay_groups
                .iter()
                .find(|g| g.agents.iter().any(|a| a == "*"))
                .map(|g| g.delay)
        })
    }
}

/// Scans robots.txt for `Crawl-delay` directives and the agents they apply to
///
/// Consecutive `User-agent` lines form one group; the first rule line closes
/// the agent list of that group.
fn parse_delay_groups(content: &str) -> Vec<DelayGroup> {
    let mut groups = Vec::new();
    let mut agents: Vec<String> = Vec::new();
    let mut in_rules = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    agents.clear();
                    in_rules = false;
                }
                agents.push(value.to_lowercase());
            }
            "crawl-delay" => {
                in_rules = true;
                if let Ok(secs) = value.parse::<f64>() {
                    if secs.is_finite() && secs >= 0.0 && !agents.is_empty() {
                        groups.push(DelayGroup {
                            agents: agents.clone(),
                            delay: Duration::from_secs_f64(secs),
                        });
                    }
                }
            }
            _ => in_rules = true,
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "KumoHarvest";

    #[test]
    fn test_allow_all() {
        let robots = ParsedRobots::allow_all();
        assert!(robots.is_allow_all());
        assert!(robots.is_allowed("https://example.com/admin", BOT));
    }

    #[test]
    fn test_disallow_all() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /");
        assert!(!robots.is_allowed("https://example.com/", BOT));
        assert!(!robots.is_allowed("https://example.com/page", BOT));
    }

    #[test]
    fn test_disallow_specific_path() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /private");
        assert!(robots.is_allowed("https://example.com/products", BOT));
        assert!(!robots.is_allowed("https://example.com/private", BOT));
        assert!(!robots.is_allowed("https://example.com/private/item?id=1", BOT));
    }

    #[test]
    fn test_allow_overrides_disallow() {
        let content = "User-agent: *\nDisallow: /private\nAllow: /private/public";
        let robots = ParsedRobots::from_content(content);
        assert!(!robots.is_allowed("https://example.com/private", BOT));
        assert!(robots.is_allowed("https://example.com/private/public", BOT));
    }

    #[test]
    fn test_agent_specific_group() {
        let content = "User-agent: KumoHarvest\nDisallow: /\n\nUser-agent: *\nAllow: /";
        let robots = ParsedRobots::from_content(content);
        assert!(!robots.is_allowed("https://example.com/page", BOT));
        assert!(robots.is_allowed("https://example.com/page", "OtherBot"));
    }

    #[test]
    fn test_malformed_content_allows() {
        let robots = ParsedRobots::from_content("<html>not robots {{{</html>");
        assert!(robots.is_allowed("https://example.com/any", BOT));
        assert_eq!(robots.crawl_delay(BOT), None);
    }

    #[test]
    fn test_blank_content_is_allow_all() {
        assert!(ParsedRobots::from_content("  \n").is_allow_all());
    }

    #[test]
    fn test_crawl_delay_wildcard() {
        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: 10\nDisallow: /admin");
        assert_eq!(robots.crawl_delay(BOT), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_crawl_delay_specific_agent_wins() {
        let content =
            "User-agent: *\nCrawl-delay: 10\n\nUser-agent: kumoharvest\nCrawl-delay: 2";
        let robots = ParsedRobots::from_content(content);
        assert_eq!(robots.crawl_delay(BOT), Some(Duration::from_secs(2)));
        assert_eq!(robots.crawl_delay("OtherBot"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_crawl_delay_decimal() {
        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: 2.5");
        assert_eq!(robots.crawl_delay(BOT), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_crawl_delay_grouped_agents() {
        let content = "User-agent: BotA\nUser-agent: BotB\nDisallow: /x\nCrawl-delay: 3\n\nUser-agent: BotC\nDisallow: /";
        let robots = ParsedRobots::from_content(content);
        assert_eq!(robots.crawl_delay("BotA"), Some(Duration::from_secs(3)));
        assert_eq!(robots.crawl_delay("BotB"), Some(Duration::from_secs(3)));
        assert_eq!(robots.crawl_delay("BotC"), None);
    }

    #[test]
    fn test_crawl_delay_ignores_garbage() {
        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: soon\nCrawl-delay: -4");
        assert_eq!(robots.crawl_delay(BOT), None);
    }
}
