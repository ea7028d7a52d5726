//! Route keys
//!
//! A route key identifies the rate-limit bucket that governs a request.
//! Snowflakes in the path collapse to `:id` except under `channels`,
//! `guilds` and `webhooks`, whose IDs are part of the bucket identity on the
//! server side.

use chat_core::Snowflake;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Messages older than this share the slow deletion bucket
const OLD_MESSAGE_MS: i64 = 14 * 24 * 60 * 60 * 1000;
/// Messages younger than this share the fast deletion bucket
const NEW_MESSAGE_MS: i64 = 10 * 1000;

static ID_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/([a-z-]+)/[0-9]{17,19}").expect("valid id segment pattern"));
static REACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/reactions/[^/]+").expect("valid reaction pattern"));
static REACTION_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/reactions/:id/[^/]+").expect("valid reaction user pattern"));
static WEBHOOK_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/webhooks/(\d+)/[A-Za-z0-9\-_]{64,}").expect("valid webhook token pattern")
});
static GUILD_CHANNELS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/guilds/[0-9]+/channels$").expect("valid guild channels pattern"));

/// Compute the route key for `path` using the current time.
///
/// `method` must already be uppercase.
pub fn route_key(path: &str, method: &str) -> String {
    route_key_at(path, method, crate::now_millis())
}

/// Compute the route key for `path` as seen at `now_ms`.
///
/// `now_ms` only matters for message deletions, where the message's age
/// selects one of three server-side buckets.
pub fn route_key_at(path: &str, method: &str, now_ms: i64) -> String {
    let route = ID_SEGMENT.replace_all(path, |caps: &Captures<'_>| {
        let major = &caps[1];
        if matches!(major, "channels" | "guilds" | "webhooks") {
            caps[0].to_string()
        } else {
            format!("/{major}/:id")
        }
    });
    let route = REACTION.replace_all(&route, "/reactions/:id");
    let route = REACTION_USER.replace_all(&route, "/reactions/:id/:userID");
    let mut route = WEBHOOK_TOKEN
        .replace(&route, "/webhooks/$1/:token")
        .into_owned();

    let mut method = method.to_string();
    if method == "DELETE" && route.ends_with("/messages/:id") {
        let message_id = path.rsplit('/').next().unwrap_or_default();
        if let Ok(id) = Snowflake::parse(message_id) {
            let age = now_ms - id.timestamp();
            if age >= OLD_MESSAGE_MS {
                method.push_str("_OLD");
            } else if age <= NEW_MESSAGE_MS {
                method.push_str("_NEW");
            }
        }
        route = format!("{method}{route}");
    } else if method == "GET" && GUILD_CHANNELS.is_match(&route) {
        route = "/guilds/:id/channels".to_string();
    }

    if method == "PUT" || method == "DELETE" {
        if let Some(index) = route.find("/reactions") {
            route = format!("MODIFY{}", &route[..index + "/reactions".len()]);
        }
    }

    route
}
