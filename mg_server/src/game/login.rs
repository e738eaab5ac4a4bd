//! The login protocol, from the server's side.
//!
//! A connection walks `Handshaking -> Authenticating -> LoggedIn -> Playing`.
//! Only the last transition touches the roster; everything before it runs on
//! the connection's own thread, so a slow auth probe never stalls the
//! dispatcher.

use super::Game;

/// What to do with a connection after its handshake packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
  /// Send the handshake reply carrying `hash`, then run the external auth
  /// probe if `needs_auth` is set, and wait for the login packet.
  Proceed { hash: String, needs_auth: bool },
  /// Send a disconnect frame with this reason and close.
  Reject { reason: String },
}

impl Game {
  /// Usernames become file names under `players/`, so anything outside
  /// `[A-Za-z0-9_-]` is rejected outright.
  pub fn validate_username(&self, username: &str) -> bool {
    self.username_re.is_match(username)
  }

  /// Decides how to answer a handshake.
  pub fn handle_handshake(&self, username: &str) -> HandshakeOutcome {
    if !self.validate_username(username) {
      return HandshakeOutcome::Reject { reason: "Bad username".into() };
    }
    if let Some(msg) = &self.config.maintenance_msg {
      info!("server under maintenance, kicking {username}");
      return HandshakeOutcome::Reject { reason: msg.clone() };
    }
    HandshakeOutcome::Proceed {
      hash:       self.server_id.clone(),
      needs_auth: self.server_id != "-",
    }
  }

  /// Runs the external auth probe for a username. Must only be called when
  /// [`handle_handshake`](Self::handle_handshake) asked for it; an offline
  /// server never calls out.
  pub fn authenticate(&self, username: &str) -> Result<(), String> {
    let url = format!(
      "{}?serverId={}&user={}",
      self.config.auth_url, self.server_id, username
    );
    match ureq::get(&url).call() {
      Ok(resp) => match resp.into_string() {
        Ok(body) if body.trim() == "YES" => Ok(()),
        Ok(_) => Err("Failed authentication".into()),
        Err(e) => Err(format!("Authentication check failed: {e}")),
      },
      Err(e) => Err(format!("Authentication check failed: {e}")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::super::tests::test_game;
  use super::*;
  use crate::config::Config;
  use pretty_assertions::assert_eq;

  #[test]
  fn username_validation() {
    let game = test_game("usernames", Config::default());
    assert!(game.validate_username("valid_user-1"));
    assert!(game.validate_username("Notch"));
    assert!(!game.validate_username("../etc"));
    assert!(!game.validate_username(""));
    assert!(!game.validate_username("with space"));
    assert!(!game.validate_username("ünïcode"));
  }

  #[test]
  fn bad_username_is_rejected_with_reason() {
    let game = test_game("reject", Config::default());
    assert_eq!(game.handle_handshake("../etc"), HandshakeOutcome::Reject {
      reason: "Bad username".into(),
    });
  }

  #[test]
  fn maintenance_mode_rejects_everyone() {
    let config = Config { maintenance_msg: Some("back soon".into()), ..Config::default() };
    let game = test_game("maintenance", config);
    assert_eq!(game.handle_handshake("valid_user-1"), HandshakeOutcome::Reject {
      reason: "back soon".into(),
    });
  }

  #[test]
  fn offline_server_skips_the_auth_probe() {
    // With a serverId of "-" the handshake proceeds straight to login, and
    // the HTTP probe must not be requested.
    let game = test_game("offline_login", Config::default());
    assert_eq!(game.handle_handshake("valid_user-1"), HandshakeOutcome::Proceed {
      hash:       "-".into(),
      needs_auth: false,
    });
  }

  #[test]
  fn online_server_requires_the_probe() {
    let game = test_game("online_login", Config { online_mode: true, ..Config::default() });
    match game.handle_handshake("valid_user-1") {
      HandshakeOutcome::Proceed { hash, needs_auth } => {
        assert!(needs_auth);
        assert_eq!(hash.len(), 16);
      }
      other => panic!("expected Proceed, got {other:?}"),
    }
  }
}
