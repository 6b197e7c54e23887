//! ---
//! chaos_section: "02-chaos-lifecycle"
//! chaos_subsection: "module"
//! chaos_type: "source"
//! chaos_scope: "code"
//! chaos_description: "Probe transports for HTTP, command and resource-state checks."
//! chaos_version: "v0.1.0"
//! chaos_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::process::Command;

use super::descriptor::{HttpMethod, HttpProbe, ProbeDescriptor, ProbeKind};
use crate::error::TransportError;
use crate::platform::Platform;

/// Executes one probe attempt and returns the raw outcome to compare.
///
/// HTTP probes yield the status code, command probes their trimmed stdout and
/// state probes the observed resource state label.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn send(&self, probe: &ProbeDescriptor) -> Result<String, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    secure: Client,
    insecure: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let secure = Client::builder()
            .build()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        let insecure = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        Ok(Self { secure, insecure })
    }

    async fn call(&self, http: &HttpProbe, probe: &ProbeDescriptor) -> Result<String, TransportError> {
        let client = if http.insecure_skip_verify {
            &self.insecure
        } else {
            &self.secure
        };
        let request = match &http.method {
            HttpMethod::Get => client.get(http.url.clone()),
            HttpMethod::Post {
                body,
                body_path,
                content_type,
            } => {
                let payload = match (body, body_path) {
                    (Some(body), _) => body.clone(),
                    (None, Some(path)) => tokio::fs::read_to_string(path).await.map_err(|err| {
                        TransportError::Request(format!(
                            "unable to read body file {}: {}",
                            path.display(),
                            err
                        ))
                    })?,
                    (None, None) => String::new(),
                };
                let mut request = client.post(http.url.clone()).body(payload);
                if let Some(content_type) = content_type {
                    request = request.header(CONTENT_TYPE, content_type.as_str());
                }
                request
            }
        };
        let response = request
            .timeout(probe.run.timeout)
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        Ok(response.status().as_u16().to_string())
    }
}

/// Runs command probes through a shell.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    shell: String,
}

impl Default for CommandTransport {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl CommandTransport {
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn call(&self, command: &str) -> Result<String, TransportError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| TransportError::Request(format!("failed to spawn command: {}", err)))?;
        if !output.status.success() {
            return Err(TransportError::Request(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Default transport dispatching on the probe kind.
#[derive(Clone)]
pub struct RoutingTransport {
    http: HttpTransport,
    cmd: CommandTransport,
    platform: Option<Arc<dyn Platform>>,
}

impl RoutingTransport {
    /// `platform` backs state probes; without it they fail as unsupported.
    pub fn new(platform: Option<Arc<dyn Platform>>) -> Result<Self, TransportError> {
        Ok(Self {
            http: HttpTransport::new()?,
            cmd: CommandTransport::default(),
            platform,
        })
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.cmd = CommandTransport::with_shell(shell);
        self
    }
}

#[async_trait]
impl ProbeTransport for RoutingTransport {
    async fn send(&self, probe: &ProbeDescriptor) -> Result<String, TransportError> {
        match &probe.kind {
            ProbeKind::Http(http) => self.http.call(http, probe).await,
            ProbeKind::Cmd(cmd) => self.cmd.call(&cmd.command).await,
            ProbeKind::State(state) => {
                let platform = self
                    .platform
                    .as_ref()
                    .ok_or(TransportError::Unsupported("state"))?;
                platform
                    .current_state(&state.target)
                    .await
                    .map(|observed| observed.as_str().to_string())
                    .map_err(|err| TransportError::Request(err.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for RoutingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTransport")
            .field("cmd", &self.cmd)
            .field("state_probes", &self.platform.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{Comparator, ProbeMode};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn http_get_and_post_report_status() {
        let router = Router::new()
            .route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route(
                "/echo",
                post(|body: String| async move {
                    if body == "ping" {
                        StatusCode::CREATED
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }),
            );
        let addr = serve(router).await;
        let transport = RoutingTransport::new(None).unwrap();

        let get_probe = ProbeDescriptor::http_get(
            "health",
            ProbeMode::Sot,
            &format!("http://{addr}/health"),
            200,
        )
        .unwrap();
        assert_eq!(transport.send(&get_probe).await.unwrap(), "503");

        let mut post_probe =
            ProbeDescriptor::http_get("echo", ProbeMode::Eot, &format!("http://{addr}/echo"), 201)
                .unwrap();
        if let ProbeKind::Http(http) = &mut post_probe.kind {
            http.method = HttpMethod::Post {
                body: Some("ping".into()),
                body_path: None,
                content_type: Some("text/plain".into()),
            };
        }
        assert_eq!(transport.send(&post_probe).await.unwrap(), "201");
    }

    #[tokio::test]
    async fn command_probe_returns_trimmed_stdout() {
        let transport = RoutingTransport::new(None).unwrap();
        let probe = ProbeDescriptor::cmd(
            "replicas",
            ProbeMode::Sot,
            "echo '  3  '",
            Comparator::new(crate::probe::ComparatorKind::Int, ">=", "2").unwrap(),
        );
        assert_eq!(transport.send(&probe).await.unwrap(), "3");

        let failing = ProbeDescriptor::cmd(
            "broken",
            ProbeMode::Sot,
            "exit 4",
            Comparator::string_equal(""),
        );
        assert!(transport.send(&failing).await.is_err());
    }

    #[tokio::test]
    async fn state_probe_without_platform_is_unsupported() {
        let transport = RoutingTransport::new(None).unwrap();
        let probe = ProbeDescriptor::state(
            "cart",
            ProbeMode::Sot,
            crate::model::TargetId::new("cart-0"),
            crate::model::ResourceState::Nominal,
        );
        assert_eq!(
            transport.send(&probe).await.unwrap_err(),
            TransportError::Unsupported("state")
        );
    }
}
