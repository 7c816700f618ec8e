use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(15))
        .build()
        .expect("Failed to build HTTP client")
});

/// One shared client for the whole process; per-request timeouts are applied
/// at the call site since image generation runs far longer than analysis.
pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
