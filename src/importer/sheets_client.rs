// ==========================================
// 线索导入系统 - 在线表格 HTTP 客户端
// ==========================================
// 公开表格: 分享链接 → CSV 导出地址（GET，无鉴权）
// 私有表格: values API（Bearer 令牌）
// 重试: 429/408/5xx 与超时/连接错误，指数退避（带上限）
// ==========================================

use crate::config::import_config_trait::SheetsSettings;
use crate::importer::error::{ImportError, ImportResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

// ==========================================
// SheetsClient Trait
// ==========================================
#[async_trait]
pub trait SheetsClient: Send + Sync {
    /// 下载公开表格的 CSV 文本
    ///
    /// # 返回
    /// - Err(SourceUnavailable): 未公开分享 / 不存在 / 网络失败
    async fn fetch_public_csv(&self, sheet_url: &str) -> ImportResult<String>;

    /// 读取私有表格某个工作表的全部单元格（按行）
    ///
    /// # 返回
    /// - Err(SourceUnauthorized): 令牌无效或无权限
    async fn fetch_values(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        access_token: &str,
    ) -> ImportResult<Vec<Vec<String>>>;
}

// ==========================================
// 地址推导
// ==========================================

/// 由分享链接推导 CSV 导出地址
///
/// 支持 `.../spreadsheets/d/{id}/edit#gid={gid}` 与 `?gid={gid}`；缺省 gid=0
pub fn public_export_url(export_base: &str, sheet_url: &str) -> ImportResult<String> {
    let parsed = Url::parse(sheet_url.trim())
        .map_err(|e| ImportError::InvalidSourceDescriptor(format!("表格链接无效: {}", e)))?;

    let segments: Vec<&str> = parsed.path_segments().map(|s| s.collect()).unwrap_or_default();
    let spreadsheet_id = segments
        .windows(2)
        .find(|w| w[0] == "d" && !w[1].is_empty())
        .map(|w| w[1].to_string())
        .ok_or_else(|| {
            ImportError::InvalidSourceDescriptor(format!("无法从链接中识别表格 ID: {}", sheet_url))
        })?;

    let gid_from_fragment = parsed.fragment().and_then(|frag| {
        frag.split('&')
            .find_map(|pair| pair.strip_prefix("gid="))
            .map(|g| g.to_string())
    });
    let gid_from_query = parsed
        .query_pairs()
        .find(|(k, _)| k == "gid")
        .map(|(_, v)| v.into_owned());
    let gid = gid_from_fragment
        .or(gid_from_query)
        .filter(|g| !g.is_empty() && g.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or_else(|| "0".to_string());

    Ok(format!(
        "{}/spreadsheets/d/{}/export?format=csv&gid={}",
        export_base.trim_end_matches('/'),
        spreadsheet_id,
        gid
    ))
}

/// values API 地址（工作表名按 A1 记法加单引号）
pub fn values_url(api_base: &str, spreadsheet_id: &str, sheet_name: &str) -> ImportResult<Url> {
    let mut url = Url::parse(api_base)
        .map_err(|e| ImportError::InternalError(format!("sheets_api_base 无效: {}", e)))?;
    let range = format!("'{}'", sheet_name.replace('\'', "''"));
    url.path_segments_mut()
        .map_err(|_| ImportError::InternalError("sheets_api_base 不能作为基地址".to_string()))?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet_id, "values", range.as_str()]);
    url.query_pairs_mut().append_pair("majorDimension", "ROWS");
    Ok(url)
}

// ==========================================
// 重试策略
// ==========================================
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(
        policy
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(policy.max_backoff_ms),
    )
}

/// 发送请求，对可重试的状态码与传输错误做有限次重试
///
/// 最后一次仍为可重试状态码时原样返回响应，由调用方按状态码分类
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> ImportResult<reqwest::Response> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return Ok(request.send().await?);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && attempt < attempts {
                    let delay = retry_delay(attempt, policy);
                    tracing::warn!(attempt, attempts, status = %status, ?delay, "表格请求重试");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                    let delay = retry_delay(attempt, policy);
                    tracing::warn!(attempt, attempts, error = %err, ?delay, "表格请求传输错误，重试");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(err.into());
            }
        }
    }

    Err(ImportError::SourceUnavailable("表格请求重试次数耗尽".to_string()))
}

// ==========================================
// HttpSheetsClient
// ==========================================
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct HttpSheetsClient {
    http: reqwest::Client,
    settings: SheetsSettings,
    policy: RetryPolicy,
}

impl HttpSheetsClient {
    pub fn new(settings: SheetsSettings) -> ImportResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;
        let policy = RetryPolicy {
            max_attempts: settings.retry_max_attempts.max(1),
            ..RetryPolicy::default()
        };
        Ok(Self {
            http,
            settings,
            policy,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl SheetsClient for HttpSheetsClient {
    async fn fetch_public_csv(&self, sheet_url: &str) -> ImportResult<String> {
        let export_url = public_export_url(&self.settings.export_base, sheet_url)?;
        tracing::debug!(export_url = %export_url, "下载公开表格");

        let response = send_with_retry(self.http.get(&export_url), &self.policy).await?;
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                return Err(ImportError::SourceUnavailable(format!(
                    "表格未公开分享或不存在 (HTTP {})",
                    status.as_u16()
                )));
            }
            s if !s.is_success() => {
                return Err(ImportError::SourceUnavailable(format!(
                    "表格下载失败 (HTTP {})",
                    s.as_u16()
                )));
            }
            _ => {}
        }

        // 未公开的表格会被重定向到登录页（HTML）
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.to_ascii_lowercase().contains("text/html"));
        if is_html {
            return Err(ImportError::SourceUnavailable(
                "表格未公开分享（返回了登录页面）".to_string(),
            ));
        }

        Ok(response.text().await?)
    }

    async fn fetch_values(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        access_token: &str,
    ) -> ImportResult<Vec<Vec<String>>> {
        let url = values_url(&self.settings.api_base, spreadsheet_id, sheet_name)?;
        tracing::debug!(spreadsheet_id, sheet_name, "读取私有表格");

        let request = self.http.get(url).bearer_auth(access_token);
        let response = send_with_retry(request, &self.policy).await?;
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ImportError::SourceUnauthorized(format!(
                    "表格连接器授权无效 (HTTP {})",
                    status.as_u16()
                )));
            }
            StatusCode::NOT_FOUND => {
                return Err(ImportError::SourceUnavailable(format!(
                    "表格或工作表不存在: {} / {}",
                    spreadsheet_id, sheet_name
                )));
            }
            s if !s.is_success() => {
                return Err(ImportError::SourceUnavailable(format!(
                    "表格读取失败 (HTTP {})",
                    s.as_u16()
                )));
            }
            _ => {}
        }

        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| ImportError::MalformedSource(format!("表格响应解析失败: {}", e)))?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}
