//! Browser identities used to make tunnel exchanges look like page traffic

use crate::crypto::random_bytes;
use std::str::FromStr;

/// Browser profiles whose User-Agent can be presented on each exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrowserProfile {
    /// Chrome 120+ on Windows/Mac/Linux
    #[default]
    Chrome,
    /// Firefox 121+ on Windows/Mac/Linux
    Firefox,
    /// Safari 17+ on macOS
    Safari,
    /// Microsoft Edge (Chromium-based)
    Edge,
    /// Random selection from profiles
    Random,
    /// iOS Safari
    IosSafari,
    /// Android Chrome
    AndroidChrome,
}

impl BrowserProfile {
    /// Get a random desktop profile
    pub fn random() -> Self {
        let mut buf = [0u8; 1];
        // Fall back to the first profile if the system RNG is unavailable
        if random_bytes(&mut buf).is_err() {
            return Self::Chrome;
        }
        match buf[0] % 4 {
            0 => Self::Chrome,
            1 => Self::Firefox,
            2 => Self::Safari,
            _ => Self::Edge,
        }
    }

    /// Get the User-Agent string for this profile
    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::Chrome => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            }
            Self::Edge => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0"
            }
            Self::Firefox => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0"
            }
            Self::Safari => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15"
            }
            Self::IosSafari => {
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1"
            }
            Self::AndroidChrome => {
                "Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36"
            }
            Self::Random => Self::random().user_agent(),
        }
    }
}

impl FromStr for BrowserProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chrome" => Ok(Self::Chrome),
            "firefox" => Ok(Self::Firefox),
            "safari" => Ok(Self::Safari),
            "edge" => Ok(Self::Edge),
            "random" => Ok(Self::Random),
            "ios" | "ios_safari" => Ok(Self::IosSafari),
            "android" | "android_chrome" => Ok(Self::AndroidChrome),
            other => Err(format!("unknown browser profile: {}", other)),
        }
    }
}
