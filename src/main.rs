use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use nbserve::config::{Settings, SettingsOverrides};
use nbserve::lifecycle::shutdown_signal;
use nbserve::proxy::RouteRegistrar;
use nbserve::publisher::FileSystemPublisher;
use nbserve::render::Renderers;
use nbserve::web::{self, state::AppState};

/// 以 HTML、源码或原始文件形式发布 Notebook 目录
#[derive(Debug, Parser)]
#[command(name = "nbserve", version, about)]
struct Cli {
    /// 配置文件路径（默认查找 ./nbserve_config.*）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 监听地址
    #[arg(long)]
    bind_ip: Option<String>,

    /// 监听端口
    #[arg(long)]
    bind_port: Option<u16>,

    /// URL 前缀
    #[arg(long)]
    base_url: Option<String>,

    /// 发布的根目录
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// 跳过代理路由注册
    #[arg(long)]
    no_register_proxy: bool,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.bind_ip.clone(),
            port: self.bind_port,
            base_url: self.base_url.clone(),
            base_path: self.base_path.clone(),
            register_proxy: self.no_register_proxy.then_some(false),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nbserve=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref(), &cli.overrides()).context("Failed to load config")?;
    info!(
        "[Config] Binding at {}:{}{}, publishing {:?}",
        settings.server.host,
        settings.server.port,
        settings.server.base_url,
        settings.publisher.base_path
    );

    let state = Arc::new(AppState {
        publisher: Arc::new(FileSystemPublisher::new(
            settings.publisher.base_path.clone(),
        )),
        renderers: Renderers::from_settings(&settings.renderer),
    });
    info!("[Config] Renderer engine: {:?}", settings.renderer.engine);

    let app = web::router(state, &settings.server.base_url);

    let listener =
        tokio::net::TcpListener::bind((settings.server.host.as_str(), settings.server.port))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind {}:{}",
                    settings.server.host, settings.server.port
                )
            })?;

    // 先注册路由再开始接受连接
    let registrar = if settings.proxy.register {
        let registrar = RouteRegistrar::from_settings(&settings.proxy)?;
        registrar
            .register(&settings.server.base_url, &settings.proxy_target())
            .await?;
        Some(registrar)
    } else {
        None
    };

    info!(
        "[Startup] Service ready at http://{}{}",
        listener.local_addr()?,
        settings.server.base_url
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(registrar) = registrar.filter(|_| settings.proxy.unregister_on_shutdown) {
        if let Err(e) = registrar.unregister(&settings.server.base_url).await {
            warn!("[Proxy] {:#}", e);
        }
    }
    info!("[Startup] Stopped");

    Ok(())
}
