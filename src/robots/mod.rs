//! Robots.txt handling
//!
//! `RobotsCache` fetches each host's robots.txt once per run and answers
//! allow/deny and crawl-delay queries from the parsed `ParsedRobots`.

mod cache;
mod parser;

pub use cache::RobotsCache;
pub use parser::ParsedRobots;
