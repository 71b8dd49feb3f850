//! Build target detection from the client User-Agent.

use serde::{Deserialize, Serialize};

/// User-Agent sent upstream in place of an unrecognized client's own.
pub const SPOOFED_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/79.0.3945.130 Safari/537.36";

/// Coarse JavaScript capability class of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTarget {
    Es2015,
    Es2018,
    Es2020,
    Es2022,
    /// No browser could be identified.
    Unknown,
}

impl BuildTarget {
    /// Classify a client by its User-Agent header.
    pub fn from_user_agent(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent else {
            return BuildTarget::Unknown;
        };

        if let Some((major, _)) = version_after(ua, "Chrome/") {
            return match major {
                94.. => BuildTarget::Es2022,
                80.. => BuildTarget::Es2020,
                64.. => BuildTarget::Es2018,
                _ => BuildTarget::Es2015,
            };
        }

        if let Some((major, _)) = version_after(ua, "Firefox/") {
            return match major {
                93.. => BuildTarget::Es2022,
                80.. => BuildTarget::Es2020,
                78.. => BuildTarget::Es2018,
                _ => BuildTarget::Es2015,
            };
        }

        if ua.contains("Safari/") {
            if let Some(version) = version_after(ua, "Version/") {
                return match version {
                    (16.., _) | (15, 4..) => BuildTarget::Es2022,
                    (14.., _) => BuildTarget::Es2020,
                    (12.., _) => BuildTarget::Es2018,
                    _ => BuildTarget::Es2015,
                };
            }
        }

        BuildTarget::Unknown
    }

    pub fn is_recognized(self) -> bool {
        self != BuildTarget::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildTarget::Es2015 => "es2015",
            BuildTarget::Es2018 => "es2018",
            BuildTarget::Es2020 => "es2020",
            BuildTarget::Es2022 => "es2022",
            BuildTarget::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse `major[.minor]` following `token`.
fn version_after(ua: &str, token: &str) -> Option<(u32, u32)> {
    let start = ua.find(token)? + token.len();
    let mut parts = ua[start..]
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .next()?
        .split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    Some((major, minor))
}
