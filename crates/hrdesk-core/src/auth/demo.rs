//! Offline demo account.
//!
//! Signing in with the demo credentials produces a fixed session without
//! contacting the backend.

use crate::models::{TokenPair, User};

pub const DEMO_USERNAME: &str = "demo@acme.co";
pub const DEMO_PASSWORD: &str = "password";

const DEMO_ACCESS_TOKEN: &str = "demo-access-token";

pub fn is_demo_login(username: &str, password: &str) -> bool {
    username.trim().eq_ignore_ascii_case(DEMO_USERNAME) && password == DEMO_PASSWORD
}

/// The demo session has no refresh token, so bootstrap restores it as-is.
pub fn demo_session() -> (TokenPair, User) {
    let user = User {
        id: "demo".to_string(),
        name: "Demo User".to_string(),
        email: DEMO_USERNAME.to_string(),
        role: Some("employee".to_string()),
    };
    (TokenPair::new(DEMO_ACCESS_TOKEN, None), user)
}
