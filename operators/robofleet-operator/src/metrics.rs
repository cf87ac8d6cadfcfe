//! 指标与健康检查模块
//!
//! 通过 Prometheus 格式导出协调结果与确保失败计数，同一 HTTP 服务器还提供
//! `/healthz` 与 `/readyz` 探针。

use anyhow::{Context, Result};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Operator 指标
pub struct Metrics {
    /// Prometheus 注册表
    registry: Registry,
    /// 协调次数，按结果分类
    reconcile_total: IntCounterVec,
    /// 确保失败次数，按步骤分类
    ensure_failures_total: IntCounterVec,
    /// 当前已知租户数
    tenants: IntGauge,
    /// 控制器是否已开始工作
    ready: AtomicBool,
}

impl Metrics {
    /// 创建并注册指标
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("robofleet_reconcile_total", "Total number of tenant reconcile passes"),
            &["result"],
        )?;
        let ensure_failures_total = IntCounterVec::new(
            Opts::new(
                "robofleet_ensure_failures_total",
                "Total number of failed ensure steps",
            ),
            &["step"],
        )?;
        let tenants = IntGauge::new("robofleet_tenants", "Number of known tenants")?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(ensure_failures_total.clone()))?;
        registry.register(Box::new(tenants.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            ensure_failures_total,
            tenants,
            ready: AtomicBool::new(false),
        })
    }

    /// 记录一次协调结果
    pub fn reconciled(&self, result: &str) {
        self.reconcile_total.with_label_values(&[result]).inc();
    }

    /// 记录一次确保失败
    pub fn ensure_failed(&self, step: &str) {
        self.ensure_failures_total.with_label_values(&[step]).inc();
    }

    /// 更新租户数量
    pub fn set_tenants(&self, count: usize) {
        self.tenants.set(count as i64);
    }

    /// 标记控制器已就绪
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// 控制器是否已就绪
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// 获取 Prometheus 注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 以文本格式编码全部指标
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("编码指标失败")?;
        Ok(buffer)
    }
}

fn respond(metrics: &Metrics, request: &Request<Body>) -> Response<Body> {
    let (status, content_type, body) = match (request.method(), request.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.encode() {
            Ok(buffer) => (StatusCode::OK, TextEncoder::new().format_type().to_string(), Body::from(buffer)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain".to_string(),
                Body::from(e.to_string()),
            ),
        },
        (&Method::GET, "/healthz") => (StatusCode::OK, "text/plain".to_string(), Body::from("ok")),
        (&Method::GET, "/readyz") if metrics.is_ready() => {
            (StatusCode::OK, "text/plain".to_string(), Body::from("ok"))
        }
        (&Method::GET, "/readyz") => (
            StatusCode::SERVICE_UNAVAILABLE,
            "text/plain".to_string(),
            Body::from("not ready"),
        ),
        _ => (StatusCode::NOT_FOUND, "text/plain".to_string(), Body::empty()),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// 启动指标与健康检查服务器，直到取消信号触发
pub async fn serve(metrics: Arc<Metrics>, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let make_svc = make_service_fn(move |_| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(respond(&metrics, &request)) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("无法绑定指标服务器地址 {}", addr))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

    info!("指标服务器启动在 {}", addr);
    if let Err(e) = server.await {
        error!("指标服务器错误: {}", e);
        return Err(e).context("指标服务器异常退出");
    }
    info!("指标服务器已停止");
    Ok(())
}
