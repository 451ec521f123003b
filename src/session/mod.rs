use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::config::config_dir;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated { user: String },
}

impl Session {
    pub fn login(user: &str) -> Result<Self> {
        let user = user.trim();
        if user.is_empty() {
            return Err(anyhow!("user must not be empty"));
        }
        if user.contains(['\n', '\r']) {
            return Err(anyhow!("user must be a single line"));
        }
        Ok(Session::Authenticated {
            user: user.to_string(),
        })
    }

    pub fn logout(self) -> Self {
        Session::Anonymous
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated { .. })
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Session::Authenticated { user } => Some(user),
            Session::Anonymous => None,
        }
    }

    pub fn parse(s: &str) -> Self {
        let mut authenticated = false;
        let mut user = None;
        for line in s.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "authenticated" => authenticated = value.trim() == "true",
                "user" => user = Some(value.trim().to_string()),
                _ => {}
            }
        }
        match user {
            Some(user) if authenticated && !user.is_empty() => Session::Authenticated { user },
            _ => Session::Anonymous,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Session::Anonymous => "authenticated=false\nuser=\n".to_string(),
            Session::Authenticated { user } => format!("authenticated=true\nuser={user}\n"),
        }
    }
}

pub fn session_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("session")
}

pub fn load(home_dir: &Path) -> Session {
    match std::fs::read_to_string(session_path(home_dir)) {
        Ok(s) => Session::parse(&s),
        Err(_) => Session::Anonymous,
    }
}

pub fn save(home_dir: &Path, session: &Session) -> Result<PathBuf> {
    let path = session_path(home_dir);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    }
    std::fs::write(&path, session.render())
        .with_context(|| format!("failed to write session file: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_anonymous_authenticated_anonymous() {
        let session = Session::default();
        assert!(!session.is_authenticated());
        let session = Session::login(" alice ").unwrap();
        assert_eq!(session.user(), Some("alice"));
        let session = session.logout();
        assert_eq!(session, Session::Anonymous);
    }

    #[test]
    fn login_rejects_blank_or_multiline_user() {
        assert!(Session::login("   ").is_err());
        assert!(Session::login("a\nauthenticated=false").is_err());
    }

    #[test]
    fn render_and_parse_agree() {
        let session = Session::login("ops").unwrap();
        assert_eq!(session.render(), "authenticated=true\nuser=ops\n");
        assert_eq!(Session::parse(&session.render()), session);
        assert_eq!(Session::parse(&Session::Anonymous.render()), Session::Anonymous);
    }

    #[test]
    fn partial_flags_are_anonymous() {
        assert_eq!(Session::parse(""), Session::Anonymous);
        assert_eq!(Session::parse("authenticated=true\n"), Session::Anonymous);
        assert_eq!(Session::parse("user=ops\n"), Session::Anonymous);
        assert_eq!(
            Session::parse("authenticated=yes\nuser=ops\n"),
            Session::Anonymous
        );
    }

    #[test]
    fn missing_file_loads_anonymous() {
        let home = std::env::temp_dir().join(format!(
            "compliance-dash-session-{}-missing",
            std::process::id()
        ));
        assert_eq!(load(&home), Session::Anonymous);
    }

    #[test]
    fn save_then_load() {
        let home = std::env::temp_dir().join(format!(
            "compliance-dash-session-{}-roundtrip",
            std::process::id()
        ));
        let session = Session::login("ops").unwrap();
        let path = save(&home, &session).unwrap();
        assert!(path.ends_with(".config/compliance-dash/session"));
        assert_eq!(load(&home), session);
        let _ = std::fs::remove_dir_all(&home);
    }
}
