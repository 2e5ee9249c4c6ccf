//! Traffic obfuscation layer
//!
//! Tunnel exchanges are dressed as ordinary browser uploads: a spoofed
//! `Content-Type`, keep-alive connections and a realistic `User-Agent`
//! taken from a [`BrowserProfile`].

mod fingerprint;

pub use fingerprint::BrowserProfile;

/// Resolve the User-Agent to present, if any
///
/// An explicit string wins over a profile; neither means no header is sent.
pub fn resolve_user_agent(
    explicit: Option<&str>,
    profile: Option<BrowserProfile>,
) -> Option<String> {
    match explicit {
        Some(ua) if !ua.is_empty() => Some(ua.to_string()),
        _ => profile.map(|p| p.user_agent().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_user_agent_wins() {
        let ua = resolve_user_agent(Some("curl/8.0"), Some(BrowserProfile::Firefox));
        assert_eq!(ua.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_empty_user_agent_falls_back_to_profile() {
        let ua = resolve_user_agent(Some(""), Some(BrowserProfile::Safari));
        assert_eq!(ua.as_deref(), Some(BrowserProfile::Safari.user_agent()));
        assert_eq!(resolve_user_agent(None, None), None);
    }
}
