//! Ceremony session cookie
//!
//! The `sid` cookie carries only the opaque session ID. It is scoped to the
//! ceremony's path so a registration cookie is never sent to the
//! authentication endpoints and vice versa.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

pub const SESSION_COOKIE: &str = "sid";

/// Issues, reads and clears the session cookie with fixed security attributes
#[derive(Debug, Clone, Copy)]
pub struct SessionCookies {
    secure: bool,
    max_age_secs: i64,
}

impl SessionCookies {
    /// `secure` should be true in production; `max_age_secs` matches the session TTL
    pub fn new(secure: bool, max_age_secs: u64) -> Self {
        Self {
            secure,
            max_age_secs: i64::try_from(max_age_secs).unwrap_or(i64::MAX),
        }
    }

    fn base(&self, value: String, path: &'static str) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, value))
            .path(path)
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build()
    }

    pub fn set(&self, jar: CookieJar, session_id: &str, path: &'static str) -> CookieJar {
        let mut cookie = self.base(session_id.to_string(), path);
        cookie.set_max_age(Duration::seconds(self.max_age_secs));
        jar.add(cookie)
    }

    /// Overwrite the cookie with an immediately expired, empty one
    pub fn clear(&self, jar: CookieJar, path: &'static str) -> CookieJar {
        let mut cookie = self.base(String::new(), path);
        cookie.set_max_age(Duration::ZERO);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        jar.add(cookie)
    }

    pub fn read(&self, jar: &CookieJar) -> Option<String> {
        jar.get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }
}
