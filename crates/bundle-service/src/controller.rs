//! Client for the remote orchestration controller

use async_trait::async_trait;
use bundle_common::{ControllerStatus, Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Operations the orchestration core needs from the controller.
///
/// Every call fails with `Error::RemoteController` on transport or protocol
/// failure. Implementations do not retry.
#[async_trait]
pub trait RemoteController: Send + Sync {
    async fn deploy_service(
        &self,
        service_name: &str,
        charm_name: &str,
        num_units: u32,
    ) -> Result<Value>;

    async fn expose(&self, service_name: &str) -> Result<Value>;

    async fn add_relation(&self, endpoint_a: &str, endpoint_b: &str) -> Result<Value>;

    /// Destroying a service the controller does not know is not an error
    async fn destroy_service(&self, service_name: &str) -> Result<Value>;

    /// Machines hosting the units of a service, empty if the service is unknown
    async fn machines_for_service(&self, service_name: &str) -> Result<Vec<String>> {
        let status = self.status().await?;
        Ok(status.machines_for(service_name))
    }

    async fn destroy_machines(&self, machines: &[String], force: bool) -> Result<Value>;

    async fn status(&self) -> Result<ControllerStatus>;

    /// Configuration options of a deployed service
    async fn service_config(&self, service_name: &str) -> Result<Value>;

    /// Controller environment information
    async fn info(&self) -> Result<Value>;

    /// Release the connection; called once at the end of every request cycle
    async fn close(&self) {}
}

/// Opens one controller connection per request cycle
#[async_trait]
pub trait ControllerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteController>>;
}

/// HTTP client for the controller API
pub struct ControllerClient {
    base_url: Url,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session_token: String,
}

impl ControllerClient {
    /// Create a new controller client
    pub fn new(address: &str, port: u16, token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::remote("Failed to build the controller HTTP client", e))?;

        let base_url = Url::parse(&format!("https://{}:{}", address, port))
            .map_err(|e| Error::remote("Invalid controller address", e))?;

        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl ControllerConnector for ControllerClient {
    async fn connect(&self) -> Result<Box<dyn RemoteController>> {
        let url = api_url(&self.base_url, &["login"])?;
        debug!("Connecting to the controller: {}", url);

        let response = self
            .client
            .post(url)
            .json(&json!({ "token": self.token }))
            .send()
            .await
            .map_err(|e| Error::remote("Communication with the controller can't be performed", e))?;

        let response = check_status(response, "log in to the controller").await?;
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::remote("Failed to parse the controller login response", e))?;

        info!("Connection with the controller successfully established");

        Ok(Box::new(ControllerSession {
            base_url: self.base_url.clone(),
            session_token: login.session_token,
            client: self.client.clone(),
        }))
    }
}

/// Authenticated connection to the controller, valid for one request cycle
pub struct ControllerSession {
    base_url: Url,
    session_token: String,
    client: reqwest::Client,
}

impl ControllerSession {
    fn url(&self, segments: &[&str]) -> Result<Url> {
        api_url(&self.base_url, segments)
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> Result<reqwest::Response> {
        request
            .bearer_auth(&self.session_token)
            .send()
            .await
            .map_err(|e| Error::remote(format!("Failed to {}", action), e))
    }

    async fn send_json(&self, request: reqwest::RequestBuilder, action: &str) -> Result<Value> {
        let response = self.send(request, action).await?;
        let response = check_status(response, action).await?;
        read_json(response, action).await
    }
}

#[async_trait]
impl RemoteController for ControllerSession {
    async fn deploy_service(
        &self,
        service_name: &str,
        charm_name: &str,
        num_units: u32,
    ) -> Result<Value> {
        info!(
            "Deploying the service ({}) from the charm ({}) with ({}) unit(s)",
            service_name, charm_name, num_units
        );
        let request = self.client.post(self.url(&["services"])?).json(&json!({
            "service_name": service_name,
            "charm": charm_name,
            "num_units": num_units,
        }));
        self.send_json(request, &format!("deploy the service ({})", service_name))
            .await
    }

    async fn expose(&self, service_name: &str) -> Result<Value> {
        info!("Service ({}) is being exposed", service_name);
        let request = self
            .client
            .post(self.url(&["services", service_name, "expose"])?);
        self.send_json(request, &format!("expose the service ({})", service_name))
            .await
    }

    async fn add_relation(&self, endpoint_a: &str, endpoint_b: &str) -> Result<Value> {
        info!("Adding relation between ({}) and ({})", endpoint_a, endpoint_b);
        let request = self.client.post(self.url(&["relations"])?).json(&json!({
            "endpoints": [endpoint_a, endpoint_b],
        }));
        self.send_json(
            request,
            &format!("add the relation ({}, {})", endpoint_a, endpoint_b),
        )
        .await
    }

    async fn destroy_service(&self, service_name: &str) -> Result<Value> {
        info!("Destroying the service ({})", service_name);
        let action = format!("destroy the service ({})", service_name);
        let request = self
            .client
            .delete(self.url(&["services", service_name])?);
        let response = self.send(request, &action).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("Service ({}) already destroyed", service_name);
            return Ok(Value::Null);
        }

        let response = check_status(response, &action).await?;
        read_json(response, &action).await
    }

    async fn destroy_machines(&self, machines: &[String], force: bool) -> Result<Value> {
        info!("Destroying the machine(s) ({})", machines.join(", "));
        let request = self.client.post(self.url(&["machines", "destroy"])?).json(&json!({
            "machines": machines,
            "force": force,
        }));
        self.send_json(request, "destroy machines").await
    }

    async fn status(&self) -> Result<ControllerStatus> {
        debug!("Get the status of the system");
        let value = self
            .send_json(self.client.get(self.url(&["status"])?), "get the controller status")
            .await?;
        serde_json::from_value(value)
            .map_err(|e| Error::remote("Failed to parse the controller status", e))
    }

    async fn service_config(&self, service_name: &str) -> Result<Value> {
        debug!("Get the configuration of the service ({})", service_name);
        let request = self
            .client
            .get(self.url(&["services", service_name, "config"])?);
        self.send_json(
            request,
            &format!("get the configuration of the service ({})", service_name),
        )
        .await
    }

    async fn info(&self) -> Result<Value> {
        self.send_json(self.client.get(self.url(&["info"])?), "get the controller info")
            .await
    }

    async fn close(&self) {
        let url = match self.url(&["logout"]) {
            Ok(url) => url,
            Err(e) => {
                warn!("Failed to close the controller session: {}", e);
                return;
            }
        };
        match self.send(self.client.post(url), "log out").await {
            Ok(response) if response.status().is_success() => {
                debug!("Controller session closed");
            }
            Ok(response) => {
                warn!("Controller logout returned status {}", response.status());
            }
            Err(e) => {
                warn!("Failed to close the controller session: {}", e);
            }
        }
    }
}

/// `{base}/api/{segments..}`, each segment percent-encoded on its own so a
/// name can never reach another path
fn api_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::remote("Invalid controller address", "URL cannot be a base"))?
        .pop_if_empty()
        .push("api")
        .extend(segments);
    Ok(url)
}

async fn check_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(Error::remote(
        format!("Failed to {}: {}", action, status),
        error_text,
    ))
}

async fn read_json(response: reqwest::Response, action: &str) -> Result<Value> {
    let body = response
        .text()
        .await
        .map_err(|e| Error::remote(format!("Failed to read the response to {}", action), e))?;

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body)
        .map_err(|e| Error::remote(format!("Invalid response to {}", action), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_client_creation() {
        let client = ControllerClient::new(
            "10.0.3.1",
            17070,
            "secret".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url().as_str(), "https://10.0.3.1:17070/");
    }

    #[test]
    fn test_api_url_encodes_each_segment() {
        let base = Url::parse("https://10.0.3.1:17070").unwrap();

        let url = api_url(&base, &["services", "a1wordpress", "expose"]).unwrap();
        assert_eq!(url.as_str(), "https://10.0.3.1:17070/api/services/a1wordpress/expose");

        let url = api_url(&base, &["services", "a1/../../services/b2mysql?x#y"]).unwrap();
        assert_eq!(url.path_segments().unwrap().count(), 3);
        assert!(url.path().starts_with("/api/services/a1%2F..%2F..%2Fservices%2Fb2mysql"));
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    /// Accept one request on a local listener, answer `404` and return its
    /// request line
    async fn capture_request_line(listener: tokio::net::TcpListener) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();

        let text = String::from_utf8_lossy(&received).to_string();
        text.lines().next().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_destroy_service_stays_under_its_own_path() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(capture_request_line(listener));

        let session = ControllerSession {
            base_url: Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap(),
            session_token: "token".to_string(),
            client: reqwest::Client::new(),
        };
        session
            .destroy_service("a11700000000000/../../services/othertenantmysql")
            .await
            .unwrap();

        let request_line = server.await.unwrap();
        assert!(
            request_line.starts_with("DELETE /api/services/a11700000000000%2F"),
            "unexpected request line: {}",
            request_line
        );
    }

    #[tokio::test]
    async fn test_unreachable_controller_is_a_remote_error() {
        // nothing listens on port 9 of the loopback interface
        let client = ControllerClient::new(
            "127.0.0.1",
            9,
            "secret".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();

        match client.connect().await {
            Err(Error::RemoteController { message, .. }) => {
                assert!(message.contains("can't be performed"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
