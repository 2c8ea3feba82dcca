//! 向可配置 HTTP 代理（configurable-http-proxy）注册本服务的路由

use std::time::Duration;

use anyhow::Context;
use reqwest::{header, Client, Method};
use tracing::{debug, info};
use url::Url;

use crate::config::ProxySettings;

/// 路由注册客户端
#[derive(Debug, Clone)]
pub struct RouteRegistrar {
    client: Client,
    api_url: String,
    auth_token: String,
}

impl RouteRegistrar {
    pub fn new(
        api_url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("HTTP client init failed")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            auth_token: auth_token.into(),
        })
    }

    pub fn from_settings(settings: &ProxySettings) -> anyhow::Result<Self> {
        Self::new(
            settings.api_url.clone(),
            settings.auth_token.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// 路由地址为 API 地址与路径前缀直接拼接
    pub fn route_url(&self, path_prefix: &str) -> anyhow::Result<Url> {
        let raw = format!("{}{}", self.api_url, path_prefix);
        Url::parse(&raw).with_context(|| format!("Invalid proxy route URL: {}", raw))
    }

    /// `POST {api_url}{path_prefix}`，body 为 `{"target": ...}`
    pub async fn register(&self, path_prefix: &str, target: &str) -> anyhow::Result<()> {
        let url = self.route_url(path_prefix)?;
        let body = serde_json::json!({ "target": target });
        debug!("[Proxy] POST {} -> {}", url, target);

        self.send(
            self.request(Method::POST, url.clone())
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.to_string()),
        )
        .await
        .with_context(|| format!("Route registration at {} failed", url))?;

        info!("[Proxy] Registered {} -> {}", path_prefix, target);
        Ok(())
    }

    /// `DELETE {api_url}{path_prefix}`
    pub async fn unregister(&self, path_prefix: &str) -> anyhow::Result<()> {
        let url = self.route_url(path_prefix)?;
        debug!("[Proxy] DELETE {}", url);

        self.send(self.request(Method::DELETE, url.clone()))
            .await
            .with_context(|| format!("Route removal at {} failed", url))?;

        info!("[Proxy] Unregistered {}", path_prefix);
        Ok(())
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("token {}", self.auth_token))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<()> {
        let response = request.send().await.context("HTTP request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("proxy responded {}: {}", status, text.trim());
        }
        Ok(())
    }
}
