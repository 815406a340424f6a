use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    Client, ClientBuilder, Response, StatusCode, Url,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT},
};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use super::engine::JobEngine;
use super::error::ApiError;
use super::models::{JobClass, JobRequest, JobStatusPayload, SizeResponse, SpaceResponse, StartedJob};
use crate::common::models::ResourceId;

// 媒体库服务端的 HTTP 客户端
#[derive(Debug, Clone)]
pub struct VaultClient {
    pub inner: Client,
    base_url: Url,
}

impl VaultClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, ApiError> {
        // 保证 join 时不会吃掉最后一段路径
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&base)?;

        let inner = ClientBuilder::new()
            .timeout(Duration::from_secs(10))
            .default_headers(Self::get_default_headers(token)?)
            .build()?;

        Ok(Self { inner, base_url })
    }

    pub fn get_default_headers(token: Option<&str>) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("vaultctl/", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidResponse(format!("无效的令牌: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    // 通用请求
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let resp = self.inner.get(url).send().await.map_err(|e| {
            error!("请求失败: {}", e);
            e
        })?;
        Self::handle_response::<T>(resp).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let resp = self.inner.post(url).json(body).send().await?;
        Self::handle_response::<T>(resp).await
    }

    // 只关心是否成功的请求
    async fn send_empty(&self, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let resp = request.send().await?;
        Self::check_status(resp).await.map(|_| ())
    }

    async fn check_status(resp: Response) -> Result<Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        debug!("请求 {} 失败, 状态码: {}, 响应: {}", url, status, body);

        Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(url),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::AuthRequired,
            s if s.is_server_error() => ApiError::RetryLater,
            s => ApiError::Status(s.as_u16(), body),
        })
    }

    // 处理响应
    async fn handle_response<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        let resp = Self::check_status(resp).await?;
        let url = resp.url().to_string();
        let text = resp.text().await?;

        serde_json::from_str::<T>(&text).map_err(|e| {
            error!("失败的请求的URL: {}", url);
            error!("JSON 结构匹配失败: {}", e);
            ApiError::InvalidResponse(format!("结构匹配失败: {}. 响应: {}", e, text))
        })
    }

    fn job_path(class: JobClass, remote_job_id: &str) -> String {
        format!("api/jobs/{}/{}", class.as_str(), remote_job_id)
    }

    fn size_path(resource: &ResourceId) -> String {
        match resource {
            ResourceId::Album(id) => format!("api/size/album/{}", id),
            ResourceId::Vault => "api/size/vault".to_string(),
            ResourceId::AppData => "api/size/appdata".to_string(),
            ResourceId::Metadata => "api/size/metadata".to_string(),
        }
    }
}

#[async_trait]
impl JobEngine for VaultClient {
    async fn start_job(&self, request: &JobRequest) -> Result<StartedJob, ApiError> {
        let path = format!("api/jobs/{}", request.class().as_str());
        self.post(&path, &request.body()).await
    }

    async fn get_job_status(
        &self,
        class: JobClass,
        remote_job_id: &str,
    ) -> Result<JobStatusPayload, ApiError> {
        self.get(&Self::job_path(class, remote_job_id)).await
    }

    async fn cancel_job(&self, class: JobClass, remote_job_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("{}/cancel", Self::job_path(class, remote_job_id)))?;
        self.send_empty(self.inner.post(url)).await
    }

    async fn cleanup_job(&self, class: JobClass, remote_job_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&Self::job_path(class, remote_job_id))?;
        self.send_empty(self.inner.delete(url)).await
    }

    async fn get_resource_size(&self, resource: &ResourceId) -> Result<u64, ApiError> {
        let size: SizeResponse = self.get(&Self::size_path(resource)).await?;
        Ok(size.bytes)
    }

    async fn check_space_available(&self, bytes_required: u64) -> Result<bool, ApiError> {
        let space: SpaceResponse = self
            .get(&format!("api/storage/space?required={}", bytes_required))
            .await?;
        Ok(space.available)
    }

    async fn fetch_artifact(
        &self,
        class: JobClass,
        remote_job_id: &str,
        dest: &Path,
    ) -> Result<u64, ApiError> {
        let url = self.endpoint(&format!("{}/artifact", Self::job_path(class, remote_job_id)))?;
        // 打包产物可能很大，超时交给服务端
        let resp = self.inner.get(url).timeout(Duration::from_secs(3600)).send().await?;
        let resp = Self::check_status(resp).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("产物已保存: {:?} ({} 字节)", dest, written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_its_path_prefix() {
        let client = VaultClient::new("https://vault.local/prefix", None).unwrap();
        let url = client.endpoint("api/jobs/add_files").unwrap();
        assert_eq!(url.as_str(), "https://vault.local/prefix/api/jobs/add_files");
    }

    #[test]
    fn size_paths_per_resource() {
        assert_eq!(VaultClient::size_path(&ResourceId::Album(3)), "api/size/album/3");
        assert_eq!(VaultClient::size_path(&ResourceId::AppData), "api/size/appdata");
    }

    #[test]
    fn token_becomes_a_bearer_header() {
        let headers = VaultClient::get_default_headers(Some("abc")).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
    }
}
