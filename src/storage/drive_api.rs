//! Drive v3 元数据接口
//!
//! opendal 的 gdrive 列举结果不带 mimeType，Google 原生文档和快捷方式会被当成 0 字节文件。
//! 目录列举改为直接调用 `files.list`，按 mimeType 区分文件夹、普通文件和原生对象。

use super::{RawEntry, RawKind, OP_TIMEOUT_SECS};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::storage::gdrive::DriveCredentials;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
/// Google Docs 等原生文档和快捷方式的 MIME 前缀，无法按字节下载
const GOOGLE_APPS_MIME_PREFIX: &str = "application/vnd.google-apps.";

const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,modifiedTime)";
const PAGE_SIZE: &str = "1000";
/// 令牌到期前提前刷新
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    /// int64 以字符串返回，文件夹和原生文档没有该字段
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// 只请求了 `files(id)` 的查询结果
#[derive(Debug, Deserialize)]
struct FolderList {
    #[serde(default)]
    files: Vec<FolderRef>,
}

#[derive(Debug, Deserialize)]
struct FolderRef {
    id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub(crate) struct DriveApi {
    client: reqwest::Client,
    credentials: DriveCredentials,
    /// 同步根目录相对于「我的云端硬盘」的路径
    root: String,
    token: tokio::sync::Mutex<Option<AccessToken>>,
    /// 路径 -> 文件夹 id，只缓存已找到的文件夹
    folders: Mutex<HashMap<String, String>>,
}

impl DriveApi {
    pub(crate) fn new(root: &str, credentials: &DriveCredentials) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ProviderError::from)?;

        Ok(Self {
            client,
            credentials: credentials.clone(),
            root: root.trim_matches('/').to_string(),
            token: tokio::sync::Mutex::new(None),
            folders: Mutex::new(HashMap::new()),
        })
    }

    /// 列出目录的直接子项
    pub(crate) async fn list(&self, path: &str) -> Result<Vec<RawEntry>, ProviderError> {
        let folder = self
            .folder_id(path)
            .await?
            .ok_or_else(|| ProviderError::not_found(path))?;
        let query = format!("'{}' in parents and trashed = false", escape_query(&folder));

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query.clone()),
                ("fields", LIST_FIELDS.to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let body = self.get(&params, path).await?;
            let (page, next) = parse_listing(&body).map_err(|e| e.at(path))?;
            entries.extend(page);
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("drive 列举 {}: {} 项", path, entries.len());
        Ok(entries)
    }

    /// 逐段解析目录路径对应的文件夹 id，不存在时返回 None
    async fn folder_id(&self, path: &str) -> Result<Option<String>, ProviderError> {
        let full = super::join_path(&self.root, path.trim_matches('/'));
        let mut current = "root".to_string();
        let mut resolved = String::new();

        for segment in full.split('/').filter(|s| !s.is_empty()) {
            resolved = super::join_path(&resolved, segment);
            let cached = self
                .folders
                .lock()
                .ok()
                .and_then(|folders| folders.get(&resolved).cloned());
            if let Some(id) = cached {
                current = id;
                continue;
            }

            let params = [
                ("q", folder_query(&current, segment)),
                ("fields", "files(id)".to_string()),
                ("pageSize", "1".to_string()),
            ];
            let body = self.get(&params, path).await?;
            let list: FolderList = serde_json::from_slice(&body).map_err(|e| {
                ProviderError::new(ProviderErrorKind::Other, path, format!("drive api: {}", e))
            })?;
            let Some(folder) = list.files.into_iter().next() else {
                return Ok(None);
            };

            if let Ok(mut folders) = self.folders.lock() {
                folders.insert(resolved.clone(), folder.id.clone());
            }
            current = folder.id;
        }

        Ok(Some(current))
    }

    async fn get(&self, params: &[(&str, String)], path: &str) -> Result<Bytes, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(FILES_URL)
            .bearer_auth(token)
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::from(e).at(path))?;
        read_body(response, path).await
    }

    /// 用 refresh token 换取访问令牌，未过期时复用
    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() {
                return Ok(current.value.clone());
            }
        }

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(ProviderError::from)?;
        let body = read_body(response, "oauth token").await?;
        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            ProviderError::new(ProviderErrorKind::Other, "oauth token", e.to_string())
        })?;

        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_MARGIN);
        let value = parsed.access_token;
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }
}

async fn read_body(response: reqwest::Response, path: &str) -> Result<Bytes, ProviderError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProviderError::from(e).at(path))?;
    if status.is_success() {
        return Ok(body);
    }

    let text = String::from_utf8_lossy(&body);
    Err(ProviderError::new(
        status_kind(status, &text),
        path,
        format!("drive api {}: {}", status, text.trim()),
    ))
}

/// HTTP 状态码 -> 错误类型，403 需要看错误原因
fn status_kind(status: StatusCode, body: &str) -> ProviderErrorKind {
    match status {
        StatusCode::NOT_FOUND => ProviderErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        // rateLimitExceeded / userRateLimitExceeded
        StatusCode::FORBIDDEN if body.contains("ateLimitExceeded") => ProviderErrorKind::RateLimited,
        StatusCode::FORBIDDEN if body.contains("storageQuotaExceeded") => ProviderErrorKind::Quota,
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ProviderErrorKind::PermissionDenied,
        StatusCode::REQUEST_TIMEOUT => ProviderErrorKind::Transient,
        s if s.is_server_error() => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Other,
    }
}

/// 解析一页 `files.list` 响应，返回条目和下一页令牌
fn parse_listing(body: &[u8]) -> Result<(Vec<RawEntry>, Option<String>), ProviderError> {
    let list: FileList = serde_json::from_slice(body).map_err(|e| {
        ProviderError::new(ProviderErrorKind::Other, "", format!("drive api: {}", e))
    })?;
    let entries = list.files.into_iter().map(to_raw_entry).collect();
    Ok((entries, list.next_page_token))
}

fn to_raw_entry(file: DriveFile) -> RawEntry {
    let kind = if file.mime_type == FOLDER_MIME {
        RawKind::Directory
    } else if file.mime_type.starts_with(GOOGLE_APPS_MIME_PREFIX) {
        RawKind::Other
    } else {
        RawKind::File
    };
    let size = match kind {
        RawKind::File => file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
        _ => 0,
    };

    RawEntry {
        name: file.name,
        kind,
        size,
        modified: file
            .modified_time
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH)),
        id: file.id,
    }
}

fn folder_query(parent: &str, name: &str) -> String {
    format!(
        "'{}' in parents and name = '{}' and mimeType = '{}' and trashed = false",
        escape_query(parent),
        escape_query(name),
        FOLDER_MIME
    )
}

/// 查询字符串中的单引号和反斜杠需要转义
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
