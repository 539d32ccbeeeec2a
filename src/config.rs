// Application configuration
// Debug builds log negotiation chatter by default, release builds only warnings

use crate::error::{Error, Result};
use crate::peer::media::CaptureRequest;
use crate::peer::state::GRACE_PERIOD;
use crate::peer::types::{Role, ServerConfig};
use crate::utils::random_id;
use clap::Parser;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Filter used when neither `RUST_LOG` nor `--log-filter` is given
pub fn default_log_filter() -> &'static str {
    if LOGGING_ENABLED {
        "screenlink=debug,webrtc=warn"
    } else {
        "screenlink=warn,webrtc=error"
    }
}

/// Everything one session needs before it opens the signaling channel
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the signaling endpoint (`ws://` or `wss://`)
    pub signaling_url: String,
    pub session_id: String,
    pub role: Role,
    /// Empty means the public STUN defaults
    pub ice_servers: Vec<ServerConfig>,
    pub capture: CaptureRequest,
    /// Upper bound on an ICE restart before the session is given up
    pub recovery_grace: Duration,
}

impl SessionConfig {
    pub fn new(signaling_url: impl Into<String>, session_id: impl Into<String>, role: Role) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            session_id: session_id.into(),
            role,
            ice_servers: Vec::new(),
            capture: CaptureRequest::default(),
            recovery_grace: GRACE_PERIOD,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(Error::InvalidConfig("session id cannot be empty".into()));
        }
        if self.signaling_url.is_empty() {
            return Err(Error::InvalidConfig("signaling url cannot be empty".into()));
        }
        validate_ice_servers(&self.ice_servers)
    }

    /// Configured ICE servers, or the defaults when none were given
    pub fn effective_ice_servers(&self) -> Vec<ServerConfig> {
        if self.ice_servers.is_empty() {
            default_ice_servers()
        } else {
            self.ice_servers.clone()
        }
    }
}

/// Rejects empty URLs and TURN entries without credentials
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<()> {
    for server in servers {
        if server.url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "ICE server '{}' has an empty url",
                server.id
            )));
        }

        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(Error::InvalidConfig(format!(
                "TURN server '{}' requires username and credential",
                server.id
            )));
        }
    }
    Ok(())
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

/// Command line for one side of a screen sharing session
#[derive(Parser, Debug)]
#[command(name = "screenlink", version, about = "Share or view a screen over WebRTC")]
pub struct Args {
    /// Signaling server base URL
    #[arg(long, env = "SCREENLINK_SIGNALING_URL", default_value = "wss://localhost:443")]
    pub signaling_url: String,

    /// Session (display) id shared by both sides
    #[arg(long, env = "SCREENLINK_SESSION_ID")]
    pub id: Option<String>,

    /// Register as the broadcaster instead of connecting as a viewer
    #[arg(long)]
    pub register: bool,

    /// Extra STUN server, may be repeated
    #[arg(long = "stun")]
    pub stun: Vec<String>,

    /// TURN server as `url,username,credential`, may be repeated
    #[arg(long = "turn", value_parser = parse_turn)]
    pub turn: Vec<ServerConfig>,

    /// Broadcast video only
    #[arg(long)]
    pub no_audio: bool,

    /// Seconds an ICE restart may take
    #[arg(long, default_value_t = GRACE_PERIOD.as_secs())]
    pub recovery_grace_secs: u64,

    /// tracing filter directive, e.g. `screenlink=trace`
    #[arg(long, env = "SCREENLINK_LOG")]
    pub log_filter: Option<String>,
}

impl Args {
    pub fn into_config(self) -> Result<SessionConfig> {
        let role = if self.register {
            Role::Broadcaster
        } else {
            Role::Viewer
        };

        let session_id = match (self.id, role) {
            (Some(id), _) => id,
            (None, Role::Broadcaster) => random_id(),
            (None, Role::Viewer) => {
                return Err(Error::InvalidConfig(
                    "a viewer needs the broadcaster's session id (--id)".into(),
                ))
            }
        };

        let mut ice_servers: Vec<ServerConfig> = self
            .stun
            .into_iter()
            .enumerate()
            .map(|(i, url)| ServerConfig {
                id: format!("stun-{i}"),
                r#type: "stun".into(),
                url,
                username: None,
                credential: None,
            })
            .collect();
        ice_servers.extend(self.turn);

        let mut config = SessionConfig::new(self.signaling_url, session_id, role);
        config.ice_servers = ice_servers;
        config.capture.audio = !self.no_audio;
        config.recovery_grace = Duration::from_secs(self.recovery_grace_secs);
        config.validate()?;
        Ok(config)
    }
}

fn parse_turn(raw: &str) -> std::result::Result<ServerConfig, String> {
    let mut parts = raw.splitn(3, ',');
    let url = parts.next().filter(|u| !u.is_empty());
    let username = parts.next();
    let credential = parts.next();
    match (url, username, credential) {
        (Some(url), Some(username), Some(credential)) => Ok(ServerConfig {
            id: format!("turn-{url}"),
            r#type: "turn".into(),
            url: url.to_string(),
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }),
        _ => Err("expected url,username,credential".into()),
    }
}
