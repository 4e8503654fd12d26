//! 超时 + 指数退避重试
//!
//! 包装任意网关：每次调用套 `tokio::time::timeout`，可重试错误（超时、限流、网络）
//! 按指数退避重试，致命错误（鉴权、请求不合法）立即返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clients::{LlmGateway, LlmRequest};
use crate::config::RetryConfig;
use crate::error::GatewayError;

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    /// 第 `attempt` 次失败后的等待时长（从 1 开始）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// 带超时和重试的网关
pub struct RetryingGateway {
    inner: Arc<dyn LlmGateway>,
    policy: RetryPolicy,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn LlmGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmGateway for RetryingGateway {
    async fn complete(&self, request: &LlmRequest) -> Result<String, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(self.policy.timeout, self.inner.complete(request)).await;
            let err = match outcome {
                Ok(Ok(text)) => {
                    if attempt > 1 {
                        debug!("[{}] 第 {} 次尝试成功", request.stage.as_str(), attempt);
                    }
                    return Ok(text);
                }
                Ok(Err(e)) => e,
                Err(_) => GatewayError::Timeout(self.policy.timeout.as_secs()),
            };

            if !err.is_retryable() {
                warn!("[{}] ❌ LLM 调用失败（不可重试）: {}", request.stage.as_str(), err);
                return Err(err);
            }
            if attempt >= self.policy.max_attempts {
                warn!(
                    "[{}] ❌ LLM 调用失败，已尝试 {} 次: {}",
                    request.stage.as_str(),
                    attempt,
                    err
                );
                return Err(err);
            }

            let mut delay = self.policy.backoff(attempt);
            if let GatewayError::RateLimited {
                retry_after_secs: Some(secs),
            } = &err
            {
                delay = delay.max(Duration::from_secs(*secs)).min(self.policy.max_delay);
            }
            warn!(
                "[{}] ⚠️ LLM 调用出错，{} 毫秒后重试 (第 {}/{} 次): {}",
                request.stage.as_str(),
                delay.as_millis(),
                attempt,
                self.policy.max_attempts,
                err
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn is_offline(&self) -> bool {
        self.inner.is_offline()
    }
}
