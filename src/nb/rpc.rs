//! NooBaa RPC Client
//!
//! JSON-RPC over HTTPS against the management endpoint of the core server.
//! Every call is a POST of `{ api, method, params, auth_token }` to `/rpc/`.

use crate::domain::ports::{
    AuthReply, CreateAuthParams, CreateSystemParams, ListAccountsReply, ManagementApi,
    ManagementConnector, ReadAuthReply,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Wire Format
// =============================================================================

/// Request envelope
#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    api: &'a str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<P>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
}

/// Reply envelope
#[derive(Debug, Deserialize)]
struct RpcReply<R> {
    #[serde(default)]
    op: String,
    #[serde(default)]
    reqid: serde_json::Value,
    #[serde(default)]
    took: f64,
    reply: Option<R>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// Error carried by a failed reply
#[derive(Debug, Clone, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    rpc_code: String,
    #[serde(default)]
    message: String,
}

// =============================================================================
// RPC Client
// =============================================================================

/// Management API client over the RPC endpoint
pub struct RpcClient {
    http: reqwest::Client,
    rpc_url: String,
    auth_token: Option<String>,
}

impl RpcClient {
    /// Create a client for `endpoint` (`scheme://host:port`)
    pub fn new(endpoint: &str, timeout: Duration, insecure_tls: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self {
            http,
            rpc_url: rpc_url(endpoint),
            auth_token: None,
        })
    }

    /// URL every call is posted to
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call<P, R>(&self, api: &str, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            api,
            method,
            params,
            auth_token: self.auth_token.as_deref().filter(|t| !t.is_empty()),
        };

        debug!(api, method, url = %self.rpc_url, "RPC request");
        let response = self.http.post(&self.rpc_url).json(&request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let reply = parse_reply(api, method, status.as_u16(), &body)?;
        into_result(api, method, reply)
    }
}

fn parse_reply<R: DeserializeOwned>(api: &str, method: &str, status: u16, body: &[u8]) -> Result<RpcReply<R>> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(api, method, status, "Unparsable RPC reply");
        Error::Api {
            method: format!("{}.{}", api, method),
            code: status.to_string(),
            message: e.to_string(),
        }
    })
}

fn rpc_url(endpoint: &str) -> String {
    format!("{}/rpc/", endpoint.trim_end_matches('/'))
}

fn into_result<R>(api: &str, method: &str, reply: RpcReply<R>) -> Result<R> {
    if let Some(err) = reply.error {
        warn!(api, method, code = %err.rpc_code, "RPC error: {}", err.message);
        return Err(Error::Api {
            method: format!("{}.{}", api, method),
            code: err.rpc_code,
            message: err.message,
        });
    }
    debug!(api, method, op = %reply.op, reqid = %reply.reqid, took = reply.took, "RPC reply");
    reply.reply.ok_or_else(|| Error::Api {
        method: format!("{}.{}", api, method),
        code: "NO_REPLY".to_string(),
        message: "reply is missing".to_string(),
    })
}

#[async_trait]
impl ManagementApi for RpcClient {
    fn set_auth_token(&mut self, token: &str) {
        self.auth_token = Some(token.to_string());
    }

    async fn read_auth(&self) -> Result<ReadAuthReply> {
        self.call::<(), _>("auth_api", "read_auth", None).await
    }

    async fn create_auth(&self, params: CreateAuthParams) -> Result<AuthReply> {
        self.call("auth_api", "create_auth", Some(params)).await
    }

    async fn create_system(&self, params: CreateSystemParams) -> Result<AuthReply> {
        self.call("system_api", "create_system", Some(params)).await
    }

    async fn list_accounts(&self) -> Result<ListAccountsReply> {
        self.call::<(), _>("account_api", "list_accounts", None).await
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Builds [`RpcClient`]s with shared transport settings
#[derive(Debug, Clone)]
pub struct RpcConnector {
    pub timeout: Duration,
    pub insecure_tls: bool,
}

impl RpcConnector {
    pub fn new(timeout: Duration, insecure_tls: bool) -> Self {
        Self {
            timeout,
            insecure_tls,
        }
    }
}

impl ManagementConnector for RpcConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn ManagementApi>> {
        Ok(Box::new(RpcClient::new(endpoint, self.timeout, self.insecure_tls)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_request_envelope() {
        let request = RpcRequest {
            api: "auth_api",
            method: "create_auth",
            params: Some(CreateAuthParams {
                system: "noobaa".into(),
                role: "admin".into(),
                email: "admin@noobaa.io".into(),
                password: "pw".into(),
            }),
            auth_token: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["api"], "auth_api");
        assert_eq!(value["method"], "create_auth");
        assert_eq!(value["params"]["role"], "admin");
        assert!(value.get("auth_token").is_none());

        let request = RpcRequest::<()> {
            api: "auth_api",
            method: "read_auth",
            params: None,
            auth_token: Some("tok"),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({ "api": "auth_api", "method": "read_auth", "auth_token": "tok" }));
    }

    #[test]
    fn test_reply_success() {
        let reply: RpcReply<AuthReply> = serde_json::from_value(json!({
            "op": "res",
            "reqid": 1,
            "took": 3.5,
            "reply": { "token": "abc", "operator_token": "op" }
        }))
        .unwrap();
        let auth = into_result("system_api", "create_system", reply).unwrap();
        assert_eq!(auth.token, "abc");
        assert_eq!(auth.operator_token.as_deref(), Some("op"));
    }

    #[test]
    fn test_reply_error() {
        let reply: RpcReply<AuthReply> = serde_json::from_value(json!({
            "op": "res",
            "reqid": 2,
            "error": { "rpc_code": "UNAUTHORIZED", "message": "credentials not found" }
        }))
        .unwrap();
        let err = into_result("auth_api", "create_auth", reply).unwrap_err();
        assert_matches!(err, Error::Api { ref code, .. } if code == "UNAUTHORIZED");
        assert!(err.to_string().contains("auth_api.create_auth"));
    }

    /// Reply payload with no `Default` impl
    #[derive(Debug, Deserialize)]
    struct Accounts {
        accounts: Vec<String>,
    }

    #[test]
    fn test_parse_reply_without_default_payload() {
        let body = br#"{"op":"res","reqid":"3","took":1,"reply":{"accounts":["admin"]}}"#;
        let reply: RpcReply<Accounts> = parse_reply("account_api", "list_accounts", 200, body).unwrap();
        let accounts = into_result("account_api", "list_accounts", reply).unwrap();
        assert_eq!(accounts.accounts, vec!["admin"]);

        let body = br#"{"op":"res","reqid":"4"}"#;
        let reply: RpcReply<Accounts> = parse_reply("account_api", "list_accounts", 200, body).unwrap();
        assert!(reply.reply.is_none());

        let err = parse_reply::<Accounts>("account_api", "list_accounts", 502, b"<html>").unwrap_err();
        assert_matches!(err, Error::Api { ref code, .. } if code == "502");
    }

    #[test]
    fn test_rpc_url() {
        assert_eq!(rpc_url("https://10.0.0.1:30443"), "https://10.0.0.1:30443/rpc/");
        assert_eq!(rpc_url("https://10.0.0.1:30443/"), "https://10.0.0.1:30443/rpc/");
    }

    #[test]
    fn test_set_auth_token() {
        let mut client = RpcClient::new("https://10.0.0.1:30443", Duration::from_secs(5), true).unwrap();
        assert!(client.auth_token.is_none());
        client.set_auth_token("tok");
        assert_eq!(client.auth_token.as_deref(), Some("tok"));
        assert_eq!(client.rpc_url(), "https://10.0.0.1:30443/rpc/");
    }
}
