#![cfg(feature = "remote-http")]

//! HTTP client for a remote runner/blob service.
//!
//! Endpoint shape:
//! - `GET  {base}/runners/{bib}`: 200 when a record exists, 404 when not.
//! - `POST {base}/runners`: append a record (JSON body).
//! - `PUT  {base}/blobs/{key}`: store an artifact; the response body is
//!   the public reference.
//!
//! Callers wrap these in the bounded-retry combinator; this client makes a
//! single attempt per call.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::normalize::BibNumber;
use crate::store::{BlobStore, RunnerRecord, RunnerStore};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpRunnerStore {
    agent: ureq::Agent,
    base: Url,
}

impl HttpRunnerStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).context("parse remote store url")?;
        let agent = ureq::AgentBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .build();
        Ok(Self { agent, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("build endpoint url for {}", path))
    }
}

impl RunnerStore for HttpRunnerStore {
    fn exists(&mut self, bib: &BibNumber) -> Result<bool> {
        let url = self.endpoint(&format!("runners/{}", bib))?;
        match self.agent.get(url.as_str()).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(err) => Err(anyhow!("remote existence check for bib {}: {}", bib, err)),
        }
    }

    fn insert(&mut self, record: &RunnerRecord) -> Result<()> {
        let url = self.endpoint("runners")?;
        self.agent
            .post(url.as_str())
            .send_json(serde_json::to_value(record).context("serialize runner record")?)
            .map_err(|err| anyhow!("insert record for bib {}: {}", record.bib_number, err))?;
        Ok(())
    }
}

pub struct HttpBlobStore {
    agent: ureq::Agent,
    base: Url,
}

impl HttpBlobStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).context("parse blob store url")?;
        let agent = ureq::AgentBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .build();
        Ok(Self { agent, base })
    }
}

impl BlobStore for HttpBlobStore {
    fn upload(&mut self, local_path: &Path, key: &str) -> Result<String> {
        let bytes = std::fs::read(local_path)
            .with_context(|| format!("read artifact {}", local_path.display()))?;
        let url = self
            .base
            .join(&format!("blobs/{}", key))
            .with_context(|| format!("build blob url for {}", key))?;
        let response = self
            .agent
            .put(url.as_str())
            .set("Content-Type", "image/jpeg")
            .send_bytes(&bytes)
            .map_err(|err| anyhow!("upload blob {}: {}", key, err))?;
        let reference = response
            .into_string()
            .context("read blob upload response")?;
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(anyhow!("blob service returned an empty reference"));
        }
        Ok(reference.to_string())
    }
}
