use bot_core::ResolutionError;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

const CLIENT_API_PREFIX: &str = "_matrix/";
const WELL_KNOWN_PATH: &str = ".well-known/matrix/client";

/// Turns a server name into a probed client API base URL (`.../_matrix/`).
///
/// Tries `https://{server_name}/_matrix/` first, then follows the
/// `m.homeserver.base_url` of `/.well-known/matrix/client`. Nothing is cached.
#[derive(Debug, Clone)]
pub struct HomeserverResolver {
    http: reqwest::Client,
    allow_insecure_http: bool,
}

impl HomeserverResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            allow_insecure_http: false,
        }
    }

    /// Accept plain `http` homeservers and probe over `http`. Local testing only.
    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.allow_insecure_http = allow;
        self
    }

    pub async fn resolve(&self, server_name: &str) -> Result<Url, ResolutionError> {
        let origin = format!("{}://{server_name}", self.scheme());

        let direct = api_base_url(&origin)?;
        if self.is_homeserver(&direct).await {
            info!(%direct, "server name is a homeserver");
            return Ok(direct);
        }

        if let Some(base_url) = self.discover(&origin).await {
            match api_base_url(&base_url) {
                Ok(delegated) if self.is_homeserver(&delegated).await => {
                    info!(%delegated, "homeserver found via .well-known");
                    return Ok(delegated);
                }
                Ok(delegated) => warn!(%delegated, "found bad base_url in .well-known"),
                Err(err) => warn!(%err, "found unparsable base_url in .well-known"),
            }
        }

        Err(ResolutionError::NotFound {
            server_name: server_name.to_owned(),
        })
    }

    /// `GET {candidate}client/versions` must answer 200 with a `versions` key.
    ///
    /// Candidates with a non-HTTPS scheme are rejected without a request.
    pub async fn is_homeserver(&self, candidate: &Url) -> bool {
        let scheme_ok = match candidate.scheme() {
            "https" => true,
            "http" => self.allow_insecure_http,
            _ => false,
        };
        if !scheme_ok {
            warn!(%candidate, "unknown homeserver scheme");
            return false;
        }

        let Ok(url) = candidate.join("client/versions") else {
            return false;
        };
        match self.http.get(url.clone()).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => response
                .json::<Value>()
                .await
                .is_ok_and(|body| body.get("versions").is_some()),
            Ok(response) => {
                debug!(%url, status = response.status().as_u16(), "homeserver probe rejected");
                false
            }
            Err(err) => {
                debug!(%url, %err, "homeserver probe failed");
                false
            }
        }
    }

    async fn discover(&self, origin: &str) -> Option<String> {
        let url = format!("{origin}/{WELL_KNOWN_PATH}");
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(%url, %err, ".well-known lookup failed");
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!(%url, status = response.status().as_u16(), "no .well-known document");
            return None;
        }

        let document: Value = response.json().await.ok()?;
        let base_url = document
            .get("m.homeserver")
            .and_then(|homeserver| homeserver.get("base_url"))
            .and_then(Value::as_str);
        if base_url.is_none() {
            warn!(%url, "malformed .well-known document");
        }
        base_url.map(str::to_owned)
    }

    fn scheme(&self) -> &'static str {
        if self.allow_insecure_http {
            "http"
        } else {
            "https"
        }
    }
}

/// Append the client API prefix to a homeserver base URL, keeping any path it has.
///
/// `https://h.example` and `https://h.example/` both become `https://h.example/_matrix/`.
pub fn api_base_url(base_url: &str) -> Result<Url, ResolutionError> {
    let mut url = Url::parse(base_url).map_err(|err| ResolutionError::InvalidUrl {
        url: base_url.to_owned(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ResolutionError::InvalidUrl {
            url: base_url.to_owned(),
            reason: "not a hierarchical url".to_owned(),
        });
    }

    let path = format!("{}/{CLIENT_API_PREFIX}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    fn insecure_resolver() -> HomeserverResolver {
        HomeserverResolver::new(reqwest::Client::new()).allow_insecure_http(true)
    }

    fn server_name(server: &MockServer) -> String {
        server.address().to_string()
    }

    async fn mount_versions(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/_matrix/client/versions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"versions": ["v1.11"]})),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn appends_client_prefix() {
        assert_eq!(
            api_base_url("https://h.example").expect("valid").as_str(),
            "https://h.example/_matrix/"
        );
        assert_eq!(
            api_base_url("https://h.example/").expect("valid").as_str(),
            "https://h.example/_matrix/"
        );
        assert_eq!(
            api_base_url("https://h.example/matrix-proxy/").expect("valid").as_str(),
            "https://h.example/matrix-proxy/_matrix/"
        );
    }

    #[test]
    fn rejects_unparsable_base_url() {
        assert!(matches!(
            api_base_url("not a url"),
            Err(ResolutionError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn resolves_server_name_that_is_a_homeserver() {
        let server = MockServer::start().await;
        mount_versions(&server).await;

        let base = insecure_resolver()
            .resolve(&server_name(&server))
            .await
            .expect("direct probe should succeed");

        assert_eq!(base.as_str(), format!("{}/_matrix/", server.uri()));
    }

    #[tokio::test]
    async fn follows_well_known_delegation() {
        let delegating = MockServer::start().await;
        let homeserver = MockServer::start().await;
        mount_versions(&homeserver).await;
        Mock::given(method("GET"))
            .and(path("/.well-known/matrix/client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "m.homeserver": {"base_url": homeserver.uri()}
            })))
            .mount(&delegating)
            .await;

        let base = insecure_resolver()
            .resolve(&server_name(&delegating))
            .await
            .expect("delegated probe should succeed");

        assert_eq!(base.as_str(), format!("{}/_matrix/", homeserver.uri()));
    }

    #[tokio::test]
    async fn fails_when_delegated_probe_fails() {
        let delegating = MockServer::start().await;
        let not_a_homeserver = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/matrix/client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "m.homeserver": {"base_url": not_a_homeserver.uri()}
            })))
            .mount(&delegating)
            .await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unstable_features": {}})))
            .expect(1)
            .mount(&not_a_homeserver)
            .await;

        let err = insecure_resolver()
            .resolve(&server_name(&delegating))
            .await
            .expect_err("resolution must fail");

        assert_eq!(
            err,
            ResolutionError::NotFound {
                server_name: server_name(&delegating)
            }
        );
    }

    #[tokio::test]
    async fn malformed_well_known_is_a_resolution_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/matrix/client"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = insecure_resolver()
            .resolve(&server_name(&server))
            .await
            .expect_err("resolution must fail");
        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rejects_plain_http_candidate_without_probing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": ["v1.11"]})))
            .expect(0)
            .mount(&server)
            .await;

        let candidate = api_base_url(&server.uri()).expect("valid");
        let secure = HomeserverResolver::new(reqwest::Client::new());

        assert!(!secure.is_homeserver(&candidate).await);
    }
}
