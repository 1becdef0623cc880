use anyhow::Result;
use redis::Client;

pub type Redis = Client;

/// Channel every worker event is published on; the API relays it over SSE.
pub const EVENTS_CHANNEL: &str = "events";

pub fn get_redis_client(redis_url: &str) -> Result<Redis> {
    let client = Client::open(redis_url)?;
    Ok(client)
}
