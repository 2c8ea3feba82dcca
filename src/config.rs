use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 代理鉴权 token 的环境变量
pub const PROXY_TOKEN_ENV: &str = "CONFIGPROXY_AUTH_TOKEN";
/// 未显式指定时查找的配置文件名（扩展名由 config 自动匹配）
pub const DEFAULT_CONFIG_NAME: &str = "nbserve_config";

/// 应用配置总结构，启动时加载一次，之后只读
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub publisher: PublisherSettings,
    pub proxy: ProxySettings,
    pub renderer: RendererSettings,
}

/// 服务相关配置（监听地址、端口、URL 前缀）
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// 所有内容都挂在该前缀下，规整为首尾均带 `/`
    pub base_url: String,
}

/// 文件系统内容源配置
#[derive(Debug, Deserialize, Clone)]
pub struct PublisherSettings {
    pub base_path: PathBuf,
}

/// 反向代理路由注册配置
#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    /// 是否在启动时向代理注册路由
    pub register: bool,
    /// 代理 REST API 的完整地址
    pub api_url: String,
    /// 代理转发目标（`<proto>://<host>:<port>`），缺省由监听地址推导
    pub target: Option<String>,
    pub auth_token: String,
    /// 退出时是否撤销注册
    pub unregister_on_shutdown: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RendererEngine {
    Builtin,
    Nbconvert,
}

/// Notebook 渲染配置
#[derive(Debug, Deserialize, Clone)]
pub struct RendererSettings {
    pub engine: RendererEngine,
    /// `nbconvert` 引擎使用的可执行文件
    pub nbconvert_command: String,
    /// 外部渲染进程超时时间（秒）
    pub timeout_secs: u64,
}

/// 命令行覆盖项，优先级最高
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub base_url: Option<String>,
    pub base_path: Option<PathBuf>,
    pub register_proxy: Option<bool>,
}

impl Settings {
    /// 加载配置：默认值、可选配置文件、环境变量覆盖、命令行覆盖
    ///
    /// 指定配置文件时该文件必须存在
    pub fn load(config_file: Option<&Path>, overrides: &SettingsOverrides) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let token = std::env::var(PROXY_TOKEN_ENV).unwrap_or_default();

        let mut builder = Config::builder()
            // 默认值（代码内硬编码）
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8889)?
            .set_default("server.base_url", "/")?
            .set_default("publisher.base_path", cwd.to_string_lossy().into_owned())?
            .set_default("proxy.register", true)?
            .set_default("proxy.api_url", "http://127.0.0.1:8001/api/routes")?
            .set_default::<&str, Option<String>>("proxy.target", None)?
            // token 默认取自环境变量，配置文件可覆盖
            .set_default("proxy.auth_token", token)?
            .set_default("proxy.unregister_on_shutdown", true)?
            .set_default("proxy.timeout_secs", 10)?
            .set_default("renderer.engine", "builtin")?
            .set_default("renderer.nbconvert_command", "jupyter")?
            .set_default("renderer.timeout_secs", 60)?;

        builder = match config_file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };
        builder = builder.add_source(Environment::with_prefix("NBSERVE").separator("__"));

        if let Some(host) = &overrides.host {
            builder = builder.set_override("server.host", host.as_str())?;
        }
        if let Some(port) = overrides.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(base_url) = &overrides.base_url {
            builder = builder.set_override("server.base_url", base_url.as_str())?;
        }
        if let Some(base_path) = &overrides.base_path {
            builder = builder.set_override(
                "publisher.base_path",
                base_path.to_string_lossy().into_owned(),
            )?;
        }
        if let Some(register) = overrides.register_proxy {
            builder = builder.set_override("proxy.register", register)?;
        }

        let config = builder.build()?;
        let mut settings: Settings = config.try_deserialize()?;
        settings.server.base_url = normalize_base_url(&settings.server.base_url);
        Ok(settings)
    }

    /// 代理转发目标，未配置时使用 `http://{host}:{port}`
    pub fn proxy_target(&self) -> String {
        self.proxy
            .target
            .clone()
            .filter(|target| !target.is_empty())
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }
}

/// 保证 URL 前缀以 `/` 开头和结尾
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}
