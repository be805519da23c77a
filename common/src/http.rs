use crate::config::HttpConfig;
use crate::errors::*;
pub use reqwest::{Client, RequestBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time;

pub fn client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout()))
        .build()
        .map_err(Error::from)
}

/// Retry `f` up to `retries` times after the first attempt, doubling the delay each time.
pub async fn with_retries<T, F, Fut>(retries: u32, base_delay: Duration, mut f: F) -> Result<T>
    where F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = base_delay;
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!("Attempt {} failed, retrying in {:?}: {:#}", attempt, delay, err);
                time::sleep(delay).await;
                delay *= 2;
            },
            Err(err) => return Err(err),
        }
    }
}
