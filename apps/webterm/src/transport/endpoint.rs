use url::Url;

use crate::config::ClientConfig;
use crate::session::{SessionKind, SessionParams};

/// Builds the websocket endpoint for a session.
///
/// `<ws|wss>://<host>/<channel>?sessionId=<label>&kind=<kind>[&projectId=<id>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    host: String,
    use_tls: bool,
    interactive_channel: String,
    run_channel: String,
}

impl EndpointConfig {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            host: config.host.clone(),
            use_tls: config.use_tls(),
            interactive_channel: config.interactive_channel.clone(),
            run_channel: config.run_channel.clone(),
        }
    }

    /// Base URL with the scheme filled in.
    pub fn base_url(&self) -> String {
        if self.host.starts_with("ws://") || self.host.starts_with("wss://") {
            self.host.trim_end_matches('/').to_string()
        } else if self.use_tls {
            format!("wss://{}", self.host.trim_end_matches('/'))
        } else {
            format!("ws://{}", self.host.trim_end_matches('/'))
        }
    }

    pub fn channel(&self, kind: SessionKind) -> &str {
        match kind {
            SessionKind::Interactive => &self.interactive_channel,
            SessionKind::RunLog => &self.run_channel,
        }
    }

    pub fn session_url(
        &self,
        kind: SessionKind,
        label: &str,
        params: &SessionParams,
    ) -> Result<Url, url::ParseError> {
        let channel = self.channel(kind).trim_start_matches('/');
        let mut url = Url::parse(&format!("{}/{}", self.base_url(), channel))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sessionId", label);
            query.append_pair("kind", kind.as_query_value());
            if let Some(project_id) = params.project_id() {
                query.append_pair("projectId", project_id);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(host: &str) -> EndpointConfig {
        EndpointConfig::from_config(&ClientConfig::default().with_host(host))
    }

    #[test]
    fn interactive_endpoint_uses_terminal_channel() {
        let url = endpoints("127.0.0.1:8080")
            .session_url(SessionKind::Interactive, "term-1", &SessionParams::default())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:8080/ws/terminal?sessionId=term-1&kind=interactive"
        );
    }

    #[test]
    fn run_endpoint_carries_project_id() {
        let params = SessionParams::for_project("proj 42");
        let url = endpoints("ide.example.com")
            .session_url(SessionKind::RunLog, "run-2", &params)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://ide.example.com/ws/run?sessionId=run-2&kind=run&projectId=proj+42"
        );
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let config = endpoints("ws://ide.internal:9000/");
        assert_eq!(config.base_url(), "ws://ide.internal:9000");
    }
}
