use std::io::{Read, Write};
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::download::CancelToken;
use crate::error::RefmanError;

const CHUNK_SIZE: usize = 64 * 1024;

/// One transfer attempt. Retrying is the downloader's concern.
pub trait RemoteClient: Send + Sync {
    fn fetch(
        &self,
        url: &Url,
        destination: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<u64, RefmanError>;
}

#[derive(Clone)]
pub struct HttpRemoteClient {
    client: Client,
}

impl HttpRemoteClient {
    pub fn new(timeout: Duration) -> Result<Self, RefmanError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("refman/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RefmanError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .timeout(timeout)
            .build()
            .map_err(|err| RefmanError::Network {
                url: String::new(),
                retryable: false,
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl RemoteClient for HttpRemoteClient {
    fn fetch(
        &self,
        url: &Url,
        destination: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<u64, RefmanError> {
        if cancel.is_cancelled() {
            return Err(RefmanError::Cancelled);
        }

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| RefmanError::Network {
                url: url.to_string(),
                retryable: is_retryable_error(&err),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefmanError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(RefmanError::Cancelled);
            }
            let read = response.read(&mut buffer).map_err(|err| RefmanError::Network {
                url: url.to_string(),
                retryable: true,
                message: err.to_string(),
            })?;
            if read == 0 {
                break;
            }
            destination
                .write_all(&buffer[..read])
                .map_err(|err| RefmanError::Filesystem(err.to_string()))?;
            written += read as u64;
        }
        Ok(written)
    }
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
