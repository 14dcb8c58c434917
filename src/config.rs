#![forbid(unsafe_code)]

// Harness and per-session configuration

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::control::StartResponse;

/// Set by ECS on Fargate tasks
pub const METADATA_ENV: &str = "ECS_CONTAINER_METADATA_URI_V4";

const LOCAL_CONFIG_URL: &str = "http://host.docker.internal:8001";
const FARGATE_CONFIG_URL: &str = "https://ide-ws.together-coding.com";
const SOCKET_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Load generator for the collaborative classroom IDE
#[derive(Debug, Clone, Parser)]
#[command(name = "load_test", version, about)]
pub struct Cli {
    /// Test-control service base URL
    #[arg(long, env = "LOAD_CONFIG_URL")]
    pub config_url: Option<String>,

    /// API base URL used for login
    #[arg(long, env = "LOAD_API_URL", default_value = "https://api.together-coding.com")]
    pub api_url: String,

    /// Number of concurrent virtual users
    #[arg(short = 'c', long, env = "LOAD_CLIENTS", default_value_t = 1)]
    pub clients: usize,

    /// Seconds over which virtual users are started
    #[arg(short = 'r', long, env = "LOAD_RAMP_UP", default_value_t = 0)]
    pub ramp_up: u64,

    /// Hard ceiling on a session, in seconds
    #[arg(long, env = "LOAD_MAX_DURATION", default_value_t = 3600)]
    pub max_duration: u64,

    /// Bearer token; logs in with the tester account when absent
    #[arg(long, env = "LOAD_TOKEN")]
    pub token: Option<String>,

    /// Task identity reported to the test-control service
    #[arg(long, env = "LOAD_TASK_ARN")]
    pub task_arn: Option<String>,

    /// Seed for reproducible action sequences
    #[arg(long, env = "LOAD_SEED")]
    pub seed: Option<u64>,

    /// Directory for the JSON result files
    #[arg(long, env = "LOAD_RESULTS_DIR", default_value = ".")]
    pub results_dir: PathBuf,
}

/// Resolved harness settings
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub config_url: String,
    pub api_url: String,
    pub clients: usize,
    pub ramp_up: Duration,
    pub max_duration: Duration,
    pub token: Option<String>,
    pub task_arn: Option<String>,
    pub metadata_url: Option<String>,
    pub seed: Option<u64>,
    pub results_dir: PathBuf,
}

impl HarnessConfig {
    /// `metadata_uri` is the ECS metadata endpoint, present only on Fargate.
    pub fn from_cli(cli: Cli, metadata_uri: Option<String>) -> Self {
        let metadata_uri = metadata_uri.filter(|uri| !uri.is_empty());
        let config_url = cli.config_url.unwrap_or_else(|| {
            if metadata_uri.is_some() {
                FARGATE_CONFIG_URL.to_string()
            } else {
                LOCAL_CONFIG_URL.to_string()
            }
        });
        Self {
            config_url: trim_slash(config_url),
            api_url: trim_slash(cli.api_url),
            clients: cli.clients.max(1),
            ramp_up: Duration::from_secs(cli.ramp_up),
            max_duration: Duration::from_secs(cli.max_duration),
            token: cli.token,
            task_arn: cli.task_arn,
            metadata_url: metadata_uri.map(|uri| format!("{}/task", trim_slash(uri))),
            seed: cli.seed,
            results_dir: cli.results_dir,
        }
    }

    pub fn is_fargate(&self) -> bool {
        self.metadata_url.is_some()
    }

    /// Delay between consecutive virtual-user starts
    pub fn ramp_up_delay(&self) -> Duration {
        if self.clients > 1 {
            self.ramp_up / self.clients as u32
        } else {
            Duration::ZERO
        }
    }
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Who this virtual user is and whose workspace it edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantIdentity {
    pub id: i64,
    pub token: String,
    pub target_participant_id: i64,
}

impl ParticipantIdentity {
    /// Mirrors its own workspace when no target is given.
    pub fn new(id: i64, token: impl Into<String>, target: Option<i64>) -> Self {
        Self {
            id,
            token: token.into(),
            target_participant_id: target.unwrap_or(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonContext {
    pub course_id: i64,
    pub lesson_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTiming {
    pub status_poll: Duration,
    pub action: Duration,
    pub liveness: Duration,
    pub new_file: Duration,
    pub max_duration: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            status_poll: Duration::from_secs(1),
            action: Duration::from_millis(500),
            liveness: Duration::from_secs(10),
            new_file: Duration::from_secs(30),
            max_duration: Duration::from_secs(3600),
        }
    }
}

/// Immutable per-run session settings, shared by every virtual user
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: ParticipantIdentity,
    pub lesson: LessonContext,
    pub test_id: i64,
    /// HTTP base of the IDE server, used for status polling
    pub server_url: String,
    pub socket_url: String,
    pub timing: SessionTiming,
}

impl SessionConfig {
    pub fn from_start(start: &StartResponse, token: impl Into<String>, timing: SessionTiming) -> Self {
        let test = &start.test_config;
        let (http, ws) = schemes_for(&test.server_host);
        Self {
            identity: ParticipantIdentity::new(start.ptc_id, token, test.target_ptc_id),
            lesson: LessonContext {
                course_id: test.course_id,
                lesson_id: test.lesson_id,
            },
            test_id: test.id,
            server_url: format!("{http}://{}", test.server_host),
            socket_url: format!("{ws}://{}{SOCKET_PATH}", test.server_host),
            timing,
        }
    }
}

/// Plain schemes for IPv4 literals and the docker host alias, TLS otherwise.
pub fn schemes_for(host: &str) -> (&'static str, &'static str) {
    if is_ipv4_host(host) || host.starts_with("host.docker.internal") {
        ("http", "ws")
    } else {
        ("https", "wss")
    }
}

fn is_ipv4_host(host: &str) -> bool {
    let addr = host.split(':').next().unwrap_or_default();
    addr.parse::<std::net::Ipv4Addr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use crate::session::control::{TestConfigRecord, TesterUser};

    fn start(host: &str, target: Option<i64>) -> StartResponse {
        StartResponse {
            id: 1,
            task_arn: "arn".to_string(),
            user_id: 2,
            ptc_id: 30,
            active: true,
            user: TesterUser {
                id: 2,
                email: "tester01@example.com".to_string(),
            },
            test_config: TestConfigRecord {
                id: 9,
                course_id: 4,
                lesson_id: 5,
                server_host: host.to_string(),
                target_ptc_id: target,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_schemes() {
        assert_eq!(schemes_for("10.0.0.3:8000"), ("http", "ws"));
        assert_eq!(schemes_for("127.0.0.1"), ("http", "ws"));
        assert_eq!(schemes_for("host.docker.internal:8000"), ("http", "ws"));
        assert_eq!(schemes_for("ide.together-coding.com"), ("https", "wss"));
        assert_eq!(schemes_for("1.2.3"), ("https", "wss"));
    }

    #[test]
    fn test_session_config_from_start() {
        let config = SessionConfig::from_start(&start("10.0.0.3:8000", None), "tok", SessionTiming::default());
        assert_eq!(config.server_url, "http://10.0.0.3:8000");
        assert_eq!(
            config.socket_url,
            "ws://10.0.0.3:8000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(config.identity.target_participant_id, 30);
        assert_eq!(config.lesson, LessonContext { course_id: 4, lesson_id: 5 });
        assert_eq!(config.test_id, 9);

        let config = SessionConfig::from_start(&start("ide.example.com", Some(44)), "tok", SessionTiming::default());
        assert_eq!(config.identity.target_participant_id, 44);
        assert!(config.socket_url.starts_with("wss://ide.example.com/"));
    }

    fn cli() -> Cli {
        Cli {
            config_url: None,
            api_url: "https://api.example.com/".to_string(),
            clients: 1,
            ramp_up: 0,
            max_duration: 3600,
            token: None,
            task_arn: None,
            seed: None,
            results_dir: PathBuf::from("."),
        }
    }

    /// Reads the declared defaults, not the ones the current environment resolves to
    fn declared_default(id: &str) -> (Vec<String>, Option<String>) {
        let command = Cli::command();
        let arg = command
            .get_arguments()
            .find(|arg| arg.get_id() == id)
            .unwrap_or_else(|| panic!("no argument {id}"));
        let defaults = arg
            .get_default_values()
            .iter()
            .map(|value| value.to_string_lossy().into_owned())
            .collect();
        let env = arg.get_env().map(|env| env.to_string_lossy().into_owned());
        (defaults, env)
    }

    #[test]
    fn test_cli_declared_defaults() {
        assert_eq!(declared_default("clients"), (vec!["1".to_string()], Some("LOAD_CLIENTS".to_string())));
        assert_eq!(
            declared_default("max_duration"),
            (vec!["3600".to_string()], Some("LOAD_MAX_DURATION".to_string()))
        );
        assert_eq!(declared_default("config_url"), (Vec::new(), Some("LOAD_CONFIG_URL".to_string())));
    }

    #[test]
    fn test_config_url_follows_deployment() {
        let local = HarnessConfig::from_cli(cli(), None);
        assert_eq!(local.config_url, LOCAL_CONFIG_URL);
        assert_eq!(local.api_url, "https://api.example.com");
        assert!(!local.is_fargate());

        let fargate = HarnessConfig::from_cli(cli(), Some("http://169.254.170.2/v4/abc".to_string()));
        assert_eq!(fargate.config_url, FARGATE_CONFIG_URL);
        assert_eq!(fargate.metadata_url.as_deref(), Some("http://169.254.170.2/v4/abc/task"));

        let blank = HarnessConfig::from_cli(cli(), Some(String::new()));
        assert!(!blank.is_fargate());
    }

    #[test]
    fn test_cli_flags() {
        // Every asserted value is passed explicitly, so LOAD_* variables cannot leak in
        let cli = Cli::parse_from([
            "load_test", "-c", "10", "-r", "20", "--config-url", "http://localhost:8001/", "--seed", "3",
        ]);
        let config = HarnessConfig::from_cli(cli, None);
        assert_eq!(config.clients, 10);
        assert_eq!(config.config_url, "http://localhost:8001");
        assert_eq!(config.ramp_up_delay(), Duration::from_secs(2));
        assert_eq!(config.seed, Some(3));
    }
}
