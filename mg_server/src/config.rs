use serde::Deserialize;
use std::path::Path;

/// Server configuration, read from a TOML file. Every field has a default,
/// so an empty (or missing) file is a valid config.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// The address the server listens on.
  pub address: String,

  /// Players are subscribed to the square of chunks within this many chunks
  /// of their own, so they see `(2r+1)^2` chunks.
  pub view_radius: i32,

  /// If set, logins are not allowed; clients get this message instead.
  pub maintenance_msg: Option<String>,

  /// If true, clients must pass the external session check before logging
  /// in. Without it the server id is "-" and anyone may join.
  pub online_mode: bool,

  /// The session check endpoint, queried with `?serverId=..&user=..`. A
  /// response body of `YES` admits the client.
  pub auth_url: String,

  /// One of error, warn, info, debug, trace.
  pub log_level: String,

  /// Path to an item definition JSON file. Empty means the built-in catalog.
  pub items_path: String,

  /// Reported to clients in the login reply.
  pub max_players: u8,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      address:         "0.0.0.0:25565".into(),
      view_radius:     5,
      maintenance_msg: None,
      online_mode:     false,
      auth_url:        "http://www.minecraft.net/game/checkserver.jsp".into(),
      log_level:       "info".into(),
      items_path:      String::new(),
      max_players:     20,
    }
  }
}

impl Config {
  /// Loads the config file, or the defaults if it does not exist. A file
  /// that exists but fails to parse is an error; silently ignoring a typo'd
  /// config is worse than refusing to start.
  pub fn load(path: &Path) -> Result<Config, String> {
    let raw = match std::fs::read_to_string(path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
      Err(e) => return Err(format!("could not read {}: {e}", path.display())),
    };
    toml::from_str(&raw).map_err(|e| format!("could not parse {}: {e}", path.display()))
  }

  pub fn log_level(&self) -> log::LevelFilter {
    match self.log_level.as_str() {
      "error" => log::LevelFilter::Error,
      "warn" => log::LevelFilter::Warn,
      "debug" => log::LevelFilter::Debug,
      "trace" => log::LevelFilter::Trace,
      _ => log::LevelFilter::Info,
    }
  }
}
