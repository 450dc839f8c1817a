//! Hugging Face Hub dataset-repository client.
//!
//! Uploads follow the Hub's commit protocol: a preupload call decides
//! whether the file goes through Git LFS or inline, LFS bodies are pushed
//! through the batch API, and a single NDJSON commit records the file.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, info_span, Instrument};

use crate::account::{AccountConfig, StorageAccount};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";
const SAMPLE_BYTES: usize = 512;
const HASH_BUFFER: usize = 1024 * 1024;

/// SHA-256, size and leading sample of a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub sha256: String,
    pub size: u64,
    pub sample: Vec<u8>,
}

/// Hash `path` on the blocking pool.
pub async fn fingerprint(path: &Path) -> StorageResult<FileFingerprint> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> StorageResult<FileFingerprint> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_BUFFER];
        let mut sample = Vec::with_capacity(SAMPLE_BYTES);
        let mut size = 0u64;

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if sample.len() < SAMPLE_BYTES {
                let take = (SAMPLE_BYTES - sample.len()).min(n);
                sample.extend_from_slice(&buf[..take]);
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(FileFingerprint {
            sha256: hex::encode(hasher.finalize()),
            size,
            sample,
        })
    })
    .await
    .map_err(|e| StorageError::upload_failed(format!("Hash task failed: {}", e)))?
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadMode {
    Lfs,
    Regular,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadFile {
    path: String,
    upload_mode: String,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Debug, Deserialize)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LfsObjectError {
    code: i64,
    message: String,
}

/// One Hub account holding dataset repositories.
#[derive(Clone)]
pub struct HfAccount {
    http: reqwest::Client,
    endpoint: String,
    slot: u8,
    username: String,
    token: String,
    api_timeout: Duration,
    transfer_timeout: Duration,
}

impl std::fmt::Debug for HfAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfAccount")
            .field("slot", &self.slot)
            .field("username", &self.username)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl HfAccount {
    pub fn new(account: AccountConfig, config: &StorageConfig) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("anistash-storage/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            slot: account.slot,
            username: account.username,
            token: account.token,
            api_timeout: config.api_timeout,
            transfer_timeout: config.transfer_timeout,
        })
    }

    /// One account per configured slot.
    pub fn from_config(config: &StorageConfig) -> StorageResult<Vec<Self>> {
        config
            .accounts
            .iter()
            .cloned()
            .map(|account| Self::new(account, config))
            .collect()
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.endpoint, path)
    }

    async fn error_from(response: reqwest::Response, context: &str) -> StorageError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(300).collect();
        StorageError::api(status, format!("{}: {}", context, body))
    }

    async fn preupload(
        &self,
        repo_id: &str,
        path_in_repo: &str,
        fp: &FileFingerprint,
    ) -> StorageResult<UploadMode> {
        let response = self
            .http
            .post(self.api_url(&format!("datasets/{}/preupload/main", repo_id)))
            .bearer_auth(&self.token)
            .timeout(self.api_timeout)
            .json(&json!({
                "files": [{
                    "path": path_in_repo,
                    "size": fp.size,
                    "sample": BASE64.encode(&fp.sample),
                }]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "preupload").await);
        }

        let parsed: PreuploadResponse = response.json().await?;
        let mode = parsed
            .files
            .iter()
            .find(|f| f.path == path_in_repo)
            .map(|f| f.upload_mode.as_str())
            .unwrap_or("lfs");

        Ok(if mode == "regular" {
            UploadMode::Regular
        } else {
            UploadMode::Lfs
        })
    }

    async fn push_lfs(&self, repo_id: &str, local_file: &Path, fp: &FileFingerprint) -> StorageResult<()> {
        let response = self
            .http
            .post(format!(
                "{}/datasets/{}.git/info/lfs/objects/batch",
                self.endpoint, repo_id
            ))
            .bearer_auth(&self.token)
            .timeout(self.api_timeout)
            .header(ACCEPT, LFS_MEDIA_TYPE)
            .header(CONTENT_TYPE, LFS_MEDIA_TYPE)
            .body(
                json!({
                    "operation": "upload",
                    "transfers": ["basic"],
                    "objects": [{ "oid": fp.sha256, "size": fp.size }],
                    "hash_algo": "sha256",
                })
                .to_string(),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "lfs batch").await);
        }

        let batch: LfsBatchResponse = response.json().await?;
        let object = batch
            .objects
            .into_iter()
            .find(|o| o.oid == fp.sha256)
            .ok_or_else(|| StorageError::upload_failed("LFS batch response missing object"))?;

        if let Some(err) = object.error {
            return Err(StorageError::upload_failed(format!(
                "LFS object rejected ({}): {}",
                err.code, err.message
            )));
        }

        let Some(actions) = object.actions else {
            debug!(oid = %fp.sha256, "LFS object already stored");
            return Ok(());
        };

        if let Some(upload) = actions.upload {
            let file = tokio::fs::File::open(local_file).await?;
            let mut request = self
                .http
                .put(&upload.href)
                .timeout(self.transfer_timeout)
                .header(CONTENT_LENGTH, fp.size)
                .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
            for (name, value) in &upload.header {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response, "lfs upload").await);
            }
        }

        if let Some(verify) = actions.verify {
            let mut request = self
                .http
                .post(&verify.href)
                .bearer_auth(&self.token)
                .timeout(self.api_timeout)
                .json(&json!({ "oid": fp.sha256, "size": fp.size }));
            for (name, value) in &verify.header {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response, "lfs verify").await);
            }
        }

        Ok(())
    }

    async fn commit(
        &self,
        repo_id: &str,
        summary: &str,
        file_line: Value,
    ) -> StorageResult<()> {
        let header = json!({ "key": "header", "value": { "summary": summary, "description": "" } });
        let body = format!("{}\n{}\n", header, file_line);

        let response = self
            .http
            .post(self.api_url(&format!("datasets/{}/commit/main", repo_id)))
            .bearer_auth(&self.token)
            .timeout(self.api_timeout)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            412 => Err(StorageError::Conflict(repo_id.to_string())),
            _ => Err(Self::error_from(response, "commit").await),
        }
    }
}

#[async_trait]
impl StorageAccount for HfAccount {
    fn slot(&self) -> u8 {
        self.slot
    }

    fn username(&self) -> &str {
        &self.username
    }

    async fn repo_exists(&self, repo_id: &str) -> StorageResult<bool> {
        let response = self
            .http
            .get(self.api_url(&format!("datasets/{}", repo_id)))
            .bearer_auth(&self.token)
            .timeout(self.api_timeout)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::error_from(response, "repo info").await),
        }
    }

    async fn create_repo(&self, repo_id: &str, private: bool) -> StorageResult<()> {
        let (organization, name) = repo_id
            .split_once('/')
            .ok_or_else(|| StorageError::create_failed(format!("Repository id {} has no namespace", repo_id)))?;

        let response = self
            .http
            .post(self.api_url("repos/create"))
            .bearer_auth(&self.token)
            .timeout(self.api_timeout)
            .json(&json!({
                "type": "dataset",
                "name": name,
                "organization": organization,
                "private": private,
            }))
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => {
                info!(slot = self.slot, repo = %repo_id, private = private, "Created dataset repository");
                Ok(())
            }
            409 => {
                debug!(repo = %repo_id, "Repository already exists");
                Ok(())
            }
            status => {
                let err = Self::error_from(response, "create repo").await;
                Err(StorageError::create_failed(format!("{} ({})", err, status)))
            }
        }
    }

    async fn upload(
        &self,
        repo_id: &str,
        path_in_repo: &str,
        local_file: &Path,
        commit_message: &str,
    ) -> StorageResult<String> {
        let span = info_span!("hf_upload", slot = self.slot, repo = %repo_id, path = %path_in_repo);

        async {
            let fp = fingerprint(local_file).await?;
            if fp.size == 0 {
                return Err(StorageError::upload_failed("Refusing to upload an empty file"));
            }

            let file_line = match self.preupload(repo_id, path_in_repo, &fp).await? {
                UploadMode::Lfs => {
                    self.push_lfs(repo_id, local_file, &fp).await?;
                    json!({
                        "key": "lfsFile",
                        "value": {
                            "path": path_in_repo,
                            "algo": "sha256",
                            "oid": fp.sha256,
                            "size": fp.size,
                        }
                    })
                }
                UploadMode::Regular => {
                    let content = tokio::fs::read(local_file).await?;
                    json!({
                        "key": "file",
                        "value": {
                            "content": BASE64.encode(content),
                            "path": path_in_repo,
                            "encoding": "base64",
                        }
                    })
                }
            };

            self.commit(repo_id, commit_message, file_line).await?;

            info!(size_mb = fp.size as f64 / (1024.0 * 1024.0), "Committed file");
            Ok(self.public_url(repo_id, path_in_repo))
        }
        .instrument(span)
        .await
    }

    fn public_url(&self, repo_id: &str, path_in_repo: &str) -> String {
        format!("{}/datasets/{}/resolve/main/{}", self.endpoint, repo_id, path_in_repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REPO: &str = "alice/weaboo-storage";
    const FILE_PATH: &str = "21/ep1/abc.mp4";

    fn account(server: &MockServer) -> HfAccount {
        let config = StorageConfig {
            endpoint: server.uri(),
            ..StorageConfig::default()
        };
        let creds = AccountConfig {
            slot: 1,
            username: "alice".into(),
            token: "hf_test".into(),
        };
        HfAccount::new(creds, &config).unwrap()
    }

    async fn write_fixture(dir: &TempDir, content: &[u8]) -> PathBuf {
        let file = dir.path().join("ep.mp4");
        tokio::fs::write(&file, content).await.unwrap();
        file
    }

    async fn mount_preupload(server: &MockServer, mode: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/api/datasets/{}/preupload/main", REPO)))
            .and(header("authorization", "Bearer hf_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "path": FILE_PATH, "uploadMode": mode, "shouldIgnore": false }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fingerprint() {
        let dir = TempDir::new().unwrap();
        let content = vec![7u8; 2000];
        let file = write_fixture(&dir, &content).await;

        let fp = fingerprint(&file).await.unwrap();
        assert_eq!(fp.size, 2000);
        assert_eq!(fp.sample.len(), SAMPLE_BYTES);
        assert_eq!(fp.sha256, hex::encode(Sha256::digest(&content)));
    }

    #[tokio::test]
    async fn test_repo_exists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/datasets/{}", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": REPO})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/datasets/alice/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let account = account(&server);
        assert!(account.repo_exists(REPO).await.unwrap());
        assert!(!account.repo_exists("alice/missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_repo_treats_conflict_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/repos/create"))
            .and(body_json(json!({
                "type": "dataset",
                "name": "weaboo-storage",
                "organization": "alice",
                "private": false,
            })))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        account(&server).create_repo(REPO, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_lfs_upload_flow() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let content = b"not really an mp4 but large enough".to_vec();
        let file = write_fixture(&dir, &content).await;
        let oid = hex::encode(Sha256::digest(&content));

        mount_preupload(&server, "lfs").await;
        Mock::given(method("POST"))
            .and(path(format!("/datasets/{}.git/info/lfs/objects/batch", REPO)))
            .and(header("accept", LFS_MEDIA_TYPE))
            .and(body_string_contains(oid.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "transfer": "basic",
                "objects": [{
                    "oid": oid,
                    "size": content.len(),
                    "actions": {
                        "upload": {
                            "href": format!("{}/s3/object", server.uri()),
                            "header": { "x-amz-meta-test": "1" }
                        },
                        "verify": { "href": format!("{}/lfs/verify", server.uri()) }
                    }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/s3/object"))
            .and(header("x-amz-meta-test", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/lfs/verify"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/api/datasets/{}/commit/main", REPO)))
            .and(header("content-type", "application/x-ndjson"))
            .and(body_string_contains("\"lfsFile\""))
            .and(body_string_contains("weaboo: add ep1 (animasu)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let url = account(&server)
            .upload(REPO, FILE_PATH, &file, "weaboo: add ep1 (animasu)")
            .await
            .unwrap();

        assert_eq!(url, format!("{}/datasets/{}/resolve/main/{}", server.uri(), REPO, FILE_PATH));
    }

    #[tokio::test]
    async fn test_lfs_object_already_present_skips_put() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let content = b"already there".to_vec();
        let file = write_fixture(&dir, &content).await;
        let oid = hex::encode(Sha256::digest(&content));

        mount_preupload(&server, "lfs").await;
        Mock::given(method("POST"))
            .and(path(format!("/datasets/{}.git/info/lfs/objects/batch", REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [{ "oid": oid, "size": content.len() }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/api/datasets/{}/commit/main", REPO)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        account(&server)
            .upload(REPO, FILE_PATH, &file, "msg")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_regular_upload_inlines_content() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = write_fixture(&dir, b"tiny").await;

        mount_preupload(&server, "regular").await;
        Mock::given(method("POST"))
            .and(path(format!("/api/datasets/{}/commit/main", REPO)))
            .and(body_string_contains("\"encoding\":\"base64\""))
            .and(body_string_contains(BASE64.encode(b"tiny").as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        account(&server)
            .upload(REPO, FILE_PATH, &file, "msg")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_commit_precondition_failure_is_conflict() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = write_fixture(&dir, b"tiny").await;

        mount_preupload(&server, "regular").await;
        Mock::given(method("POST"))
            .and(path(format!("/api/datasets/{}/commit/main", REPO)))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let err = account(&server)
            .upload(REPO, FILE_PATH, &file, "msg")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(ref r) if r == REPO));
    }

    #[tokio::test]
    async fn test_empty_file_rejected_before_network() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = write_fixture(&dir, b"").await;

        let err = account(&server)
            .upload(REPO, FILE_PATH, &file, "msg")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
