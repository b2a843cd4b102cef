//! GitHub Actions repository secrets over the REST API.
//!
//! Values are sealed with the repository's public key (libsodium sealed box)
//! before upload, as the API requires.

use crate::constants;
use crate::error::ProviderError;
use crate::models::secrets::RepoRef;
use crate::providers::SecretStore;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

pub struct GithubSecretStore {
    client: Client,
    /// `None` when the caller only runs steps that never reach GitHub.
    token: Option<Zeroizing<String>>,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct RepoPublicKey {
    key_id: String,
    key: String,
}

#[derive(Serialize)]
struct PutSecretBody<'a> {
    encrypted_value: String,
    key_id: &'a str,
}

impl GithubSecretStore {
    pub fn new(token: Option<Zeroizing<String>>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gha-aws-creds/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build GitHub HTTP client")?;
        Ok(Self {
            client,
            token,
            api_base: constants::GITHUB_API_BASE.to_string(),
        })
    }

    /// Point at a GitHub Enterprise Server API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn secrets_url(&self, repo: &RepoRef) -> String {
        format!(
            "{}/repos/{}/{}/actions/secrets",
            self.api_base, repo.owner, repo.repo
        )
    }

    fn request(
        &self,
        operation: &str,
        method: Method,
        url: &str,
    ) -> Result<RequestBuilder, ProviderError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| ProviderError::fatal(operation, "no GitHub token configured"))?;
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(token.as_str())
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", constants::GITHUB_API_VERSION))
    }

    /// The repository's Actions public key. GitHub answers 404 both for a
    /// missing repository and for one the token cannot see, so a 404 here is
    /// fatal rather than `NotFound`.
    fn public_key(&self, repo: &RepoRef) -> Result<RepoPublicKey, ProviderError> {
        let url = format!("{}/public-key", self.secrets_url(repo));
        debug!(repo = %repo, "fetch Actions public key");
        let response = self
            .request("get public key", Method::GET, &url)?
            .send()
            .map_err(|e| ProviderError::fatal("get public key", e))?;
        let resource = format!("repository {}", repo);
        let response = match check_status("get public key", resource, response) {
            Ok(response) => response,
            Err(ProviderError::NotFound { .. }) => {
                return Err(ProviderError::fatal(
                    "get public key",
                    format!("repository {} not found or not visible to the token", repo),
                ))
            }
            Err(e) => return Err(e),
        };
        response
            .json()
            .map_err(|e| ProviderError::fatal("get public key", e))
    }
}

impl SecretStore for GithubSecretStore {
    fn create_secret(&self, repo: &RepoRef, name: &str, value: &str) -> Result<(), ProviderError> {
        let public_key = self.public_key(repo)?;
        let body = PutSecretBody {
            encrypted_value: seal_secret(&public_key.key, value)?,
            key_id: &public_key.key_id,
        };
        let url = format!("{}/{}", self.secrets_url(repo), name);
        debug!(repo = %repo, secret = name, "PUT repository secret");
        let response = self
            .request("create secret", Method::PUT, &url)?
            .json(&body)
            .send()
            .map_err(|e| ProviderError::fatal("create secret", e))?;
        check_status("create secret", format!("repository {}", repo), response)?;
        Ok(())
    }

    fn delete_secret(&self, repo: &RepoRef, name: &str) -> Result<(), ProviderError> {
        let url = format!("{}/{}", self.secrets_url(repo), name);
        debug!(repo = %repo, secret = name, "DELETE repository secret");
        let response = self
            .request("delete secret", Method::DELETE, &url)?
            .send()
            .map_err(|e| ProviderError::fatal("delete secret", e))?;
        match check_status("delete secret", format!("secret {} in {}", name, repo), response) {
            Ok(_) => Ok(()),
            Err(not_found @ ProviderError::NotFound { .. }) => {
                // Only a reachable repository makes the 404 mean "no such secret".
                self.public_key(repo)?;
                Err(not_found)
            }
            Err(e) => Err(e),
        }
    }
}

fn check_status(
    operation: &str,
    resource: String,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound { resource });
    }
    let body = response.text().unwrap_or_default();
    Err(ProviderError::fatal(operation, format!("{}: {}", status, body.trim())))
}

/// Encrypt `value` for the repository key `public_key_b64` and return the
/// base64 ciphertext the API expects.
pub fn seal_secret(public_key_b64: &str, value: &str) -> Result<String, ProviderError> {
    let raw = STANDARD
        .decode(public_key_b64)
        .map_err(|e| ProviderError::fatal("seal secret", format!("invalid public key: {}", e)))?;
    let raw: [u8; crypto_box::KEY_SIZE] = raw
        .as_slice()
        .try_into()
        .map_err(|_| {
            ProviderError::fatal("seal secret", format!("public key is {} bytes", raw.len()))
        })?;
    let sealed = crypto_box::PublicKey::from(raw)
        .seal(&mut OsRng, value.as_bytes())
        .map_err(|e| ProviderError::fatal("seal secret", e))?;
    Ok(STANDARD.encode(sealed))
}
